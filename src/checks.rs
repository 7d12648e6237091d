//! Prerequisite checks run before an upgrade plan is compiled.
//!
//! The controller only consumes results; [`RuleChecks`] evaluates the
//! declarative rules loaded from the inventory.

pub mod rules;

use anyhow::Result;
use serde::Serialize;

use crate::model::RepositoryVersion;

pub use rules::{CheckRule, RuleChecks};

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrereqCheckStatus {
    Pass,
    Warning,
    Fail,
}

impl std::fmt::Display for PrereqCheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Warning => write!(f, "WARNING"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// A single check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrereqCheckResult {
    pub id: String,
    pub status: PrereqCheckStatus,
    pub reason: String,
    /// Hosts, services or config types the check failed on.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_on: Vec<String>,
}

impl PrereqCheckResult {
    pub fn pass(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: PrereqCheckStatus::Pass,
            reason: String::new(),
            failed_on: Vec::new(),
        }
    }

    /// Whether this result blocks an upgrade; warnings only when `fail_on_warnings`.
    pub fn blocks(&self, fail_on_warnings: bool) -> bool {
        match self.status {
            PrereqCheckStatus::Fail => true,
            PrereqCheckStatus::Warning => fail_on_warnings,
            PrereqCheckStatus::Pass => false,
        }
    }
}

/// Runs the prerequisite checks for an upgrade to `version`.
pub trait PrerequisiteChecks: Send + Sync {
    fn run(&self, cluster_name: &str, version: &RepositoryVersion) -> Result<Vec<PrereqCheckResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: PrereqCheckStatus) -> PrereqCheckResult {
        PrereqCheckResult {
            status,
            ..PrereqCheckResult::pass("SERVICES_UP")
        }
    }

    #[test]
    fn test_blocks() {
        assert!(result(PrereqCheckStatus::Fail).blocks(false));
        assert!(!result(PrereqCheckStatus::Warning).blocks(false));
        assert!(result(PrereqCheckStatus::Warning).blocks(true));
        assert!(!result(PrereqCheckStatus::Pass).blocks(true));
    }

    #[test]
    fn test_serialize() {
        let mut r = result(PrereqCheckStatus::Fail);
        r.reason = "Services are down".into();
        r.failed_on = vec!["HDFS".into()];
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "FAIL");
        assert_eq!(json["failed_on"][0], "HDFS");
        let pass = serde_json::to_value(PrereqCheckResult::pass("X")).unwrap();
        assert!(pass.get("failed_on").is_none());
    }
}
