//! Host task status and the aggregate status/progress of a plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::StageId;

/// Status of a single host task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostRoleStatus {
    Pending,
    Queued,
    InProgress,
    Holding,
    HoldingFailed,
    HoldingTimedout,
    Completed,
    Failed,
    Timedout,
    Aborted,
    SkippedFailed,
}

impl HostRoleStatus {
    pub const ALL: [Self; 11] = [
        Self::Pending,
        Self::Queued,
        Self::InProgress,
        Self::Holding,
        Self::HoldingFailed,
        Self::HoldingTimedout,
        Self::Completed,
        Self::Failed,
        Self::Timedout,
        Self::Aborted,
        Self::SkippedFailed,
    ];

    /// States a task never leaves without an explicit resubmit.
    pub const fn is_completed_state(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timedout | Self::Aborted | Self::SkippedFailed
        )
    }

    pub const fn is_holding_state(self) -> bool {
        matches!(
            self,
            Self::Holding | Self::HoldingFailed | Self::HoldingTimedout
        )
    }

    /// Weight of a task in this state toward completion.
    const fn progress_weight(self) -> f64 {
        match self {
            Self::Pending => 0.0,
            Self::Queued => 0.09,
            Self::InProgress | Self::Holding | Self::HoldingFailed | Self::HoldingTimedout => 0.35,
            Self::Completed
            | Self::Failed
            | Self::Timedout
            | Self::Aborted
            | Self::SkippedFailed => 1.0,
        }
    }
}

impl std::fmt::Display for HostRoleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Queued => write!(f, "QUEUED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Holding => write!(f, "HOLDING"),
            Self::HoldingFailed => write!(f, "HOLDING_FAILED"),
            Self::HoldingTimedout => write!(f, "HOLDING_TIMEDOUT"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Timedout => write!(f, "TIMEDOUT"),
            Self::Aborted => write!(f, "ABORTED"),
            Self::SkippedFailed => write!(f, "SKIPPED_FAILED"),
        }
    }
}

/// Task status counts of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub counts: BTreeMap<HostRoleStatus, usize>,
    pub skippable: bool,
}

impl StageSummary {
    pub fn new(skippable: bool) -> Self {
        Self {
            counts: BTreeMap::new(),
            skippable,
        }
    }

    pub fn record(&mut self, status: HostRoleStatus) {
        *self.counts.entry(status).or_insert(0) += 1;
    }

    pub fn count(&self, status: HostRoleStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Aggregate status and completion percentage of an execution request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedStatus {
    pub status: HostRoleStatus,
    pub percent: f64,
}

impl CalculatedStatus {
    /// Derive the request status from its stage summaries.
    pub fn from_stage_summaries(stages: &BTreeMap<StageId, StageSummary>) -> Self {
        let mut stage_statuses = StageSummary::new(false);
        let mut tasks = StageSummary::new(false);

        for summary in stages.values() {
            stage_statuses.record(summarize(summary));
            for (status, count) in &summary.counts {
                *tasks.counts.entry(*status).or_insert(0) += count;
            }
        }

        Self {
            status: summarize(&stage_statuses),
            percent: percent(&tasks),
        }
    }
}

/// Collapse a set of counts into one status, highest priority first.
pub fn summarize(summary: &StageSummary) -> HostRoleStatus {
    let total = summary.total();
    if total == 0 || summary.count(HostRoleStatus::Pending) == total {
        return HostRoleStatus::Pending;
    }

    for holding in [
        HostRoleStatus::Holding,
        HostRoleStatus::HoldingFailed,
        HostRoleStatus::HoldingTimedout,
    ] {
        if summary.count(holding) > 0 {
            return holding;
        }
    }

    if summary.count(HostRoleStatus::Failed) > 0 && !summary.skippable {
        return HostRoleStatus::Failed;
    }
    if summary.count(HostRoleStatus::Aborted) > 0 {
        return HostRoleStatus::Aborted;
    }
    if summary.count(HostRoleStatus::Timedout) > 0 && !summary.skippable {
        return HostRoleStatus::Timedout;
    }

    let completed: usize = summary
        .counts
        .iter()
        .filter(|(s, _)| s.is_completed_state())
        .map(|(_, c)| c)
        .sum();
    if completed == total {
        HostRoleStatus::Completed
    } else {
        HostRoleStatus::InProgress
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(tasks: &StageSummary) -> f64 {
    let total = tasks.total();
    if total == 0 {
        return 0.0;
    }
    let weighted: f64 = tasks
        .counts
        .iter()
        .map(|(status, count)| status.progress_weight() * *count as f64)
        .sum();
    weighted / total as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(skippable: bool, statuses: &[HostRoleStatus]) -> StageSummary {
        let mut s = StageSummary::new(skippable);
        for status in statuses {
            s.record(*status);
        }
        s
    }

    #[test]
    fn test_summarize_all_pending() {
        let s = summary(false, &[HostRoleStatus::Pending, HostRoleStatus::Pending]);
        assert_eq!(summarize(&s), HostRoleStatus::Pending);
    }

    #[test]
    fn test_summarize_holding_wins() {
        let s = summary(
            false,
            &[HostRoleStatus::Failed, HostRoleStatus::HoldingFailed],
        );
        assert_eq!(summarize(&s), HostRoleStatus::HoldingFailed);
    }

    #[test]
    fn test_summarize_failed_ignored_when_skippable() {
        let s = summary(true, &[HostRoleStatus::Failed, HostRoleStatus::Completed]);
        assert_eq!(summarize(&s), HostRoleStatus::Completed);
        let s = summary(false, &[HostRoleStatus::Failed, HostRoleStatus::Completed]);
        assert_eq!(summarize(&s), HostRoleStatus::Failed);
    }

    #[test]
    fn test_summarize_aborted_and_in_progress() {
        let s = summary(false, &[HostRoleStatus::Aborted, HostRoleStatus::Completed]);
        assert_eq!(summarize(&s), HostRoleStatus::Aborted);
        let s = summary(false, &[HostRoleStatus::Queued, HostRoleStatus::Completed]);
        assert_eq!(summarize(&s), HostRoleStatus::InProgress);
    }

    #[test]
    fn test_calculated_status_completed() {
        let mut stages = BTreeMap::new();
        stages.insert(StageId(1), summary(false, &[HostRoleStatus::Completed]));
        stages.insert(
            StageId(2),
            summary(false, &[HostRoleStatus::Completed, HostRoleStatus::Completed]),
        );
        let calc = CalculatedStatus::from_stage_summaries(&stages);
        assert_eq!(calc.status, HostRoleStatus::Completed);
        assert!((calc.percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_calculated_status_partial_progress() {
        let mut stages = BTreeMap::new();
        stages.insert(StageId(1), summary(false, &[HostRoleStatus::Completed]));
        stages.insert(StageId(2), summary(false, &[HostRoleStatus::Pending]));
        let calc = CalculatedStatus::from_stage_summaries(&stages);
        assert_eq!(calc.status, HostRoleStatus::InProgress);
        assert!((calc.percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_calculated_status_aborted_request() {
        let mut stages = BTreeMap::new();
        stages.insert(StageId(1), summary(false, &[HostRoleStatus::Completed]));
        stages.insert(StageId(2), summary(false, &[HostRoleStatus::Aborted]));
        let calc = CalculatedStatus::from_stage_summaries(&stages);
        assert_eq!(calc.status, HostRoleStatus::Aborted);
    }

    #[test]
    fn test_calculated_status_empty() {
        let calc = CalculatedStatus::from_stage_summaries(&BTreeMap::new());
        assert_eq!(calc.status, HostRoleStatus::Pending);
        assert!(calc.percent.abs() < f64::EPSILON);
    }

    #[test]
    fn test_status_display_and_serde() {
        assert_eq!(HostRoleStatus::SkippedFailed.to_string(), "SKIPPED_FAILED");
        let json = serde_json::to_string(&HostRoleStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert!(HostRoleStatus::Timedout.is_completed_state());
        assert!(!HostRoleStatus::Holding.is_completed_state());
    }
}
