//! Public entry point: start, inspect, abort and retry upgrade plans.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checks::PrerequisiteChecks;
use crate::cluster::{ClusterStore, HostResolver};
use crate::error::UpgradeError;
use crate::execution::ExecutionScheduler;
use crate::model::{
    CalculatedStatus, ClusterId, Direction, HostRoleStatus, RepositoryVersion, RequestId,
    UpgradeEntity, UpgradePack,
};
use crate::persistence::UpgradeStore;
use crate::stack::StackRepository;
use crate::telemetry::metrics::Metrics;
use crate::upgrade::compiler::CompilerSettings;
use crate::upgrade::{PlanCompiler, SequenceExpander, UpgradeContext};

// ============================================================================
// Requests and responses
// ============================================================================

/// Request to start a plan.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PlanRequest {
    #[serde(default)]
    pub cluster_name: String,
    pub version: String,
    /// DOWNGRADE only: version being left, used to locate the pack.
    #[serde(default)]
    pub from_version: Option<String>,
    #[serde(default)]
    pub downgrade: bool,
    #[serde(default)]
    pub skip_prerequisite_checks: bool,
    #[serde(default)]
    pub fail_on_warnings: bool,
    /// Overrides the pack default when set.
    #[serde(default)]
    pub skip_failures: Option<bool>,
    /// Overrides the pack default when set.
    #[serde(default)]
    pub skip_service_check_failures: Option<bool>,
}

impl PlanRequest {
    pub const fn direction(&self) -> Direction {
        if self.downgrade {
            Direction::Downgrade
        } else {
            Direction::Upgrade
        }
    }
}

/// Request to abort (`ABORTED`) or retry (`PENDING`) a plan.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PlanUpdateRequest {
    pub request_id: RequestId,
    pub status: HostRoleStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A persisted plan with its live aggregate status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    pub cluster_name: String,
    #[serde(flatten)]
    pub upgrade: UpgradeEntity,
    pub status: HostRoleStatus,
    pub progress_percent: f64,
}

/// What an update actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The request was cancelled through the scheduler.
    Cancelled,
    /// The plan had already finished; nothing was changed.
    AlreadyCompleted { status: HostRoleStatus },
    /// Aborted and timed-out tasks were resubmitted.
    Resubmitted { tasks: usize },
}

/// Collaborators the controller is wired with.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ClusterStore>,
    pub stacks: Arc<dyn StackRepository>,
    pub checks: Arc<dyn PrerequisiteChecks>,
    pub scheduler: Arc<dyn ExecutionScheduler>,
    pub upgrades: Arc<dyn UpgradeStore>,
    pub expander: Arc<dyn SequenceExpander>,
}

// ============================================================================
// Controller
// ============================================================================

/// Validated pack selection for one start request.
struct Selection {
    pack: UpgradePack,
    repository: RepositoryVersion,
}

pub struct PlanController {
    store: Arc<dyn ClusterStore>,
    stacks: Arc<dyn StackRepository>,
    checks: Arc<dyn PrerequisiteChecks>,
    scheduler: Arc<dyn ExecutionScheduler>,
    upgrades: Arc<dyn UpgradeStore>,
    compiler: PlanCompiler,
    metrics: Option<Arc<Metrics>>,
    /// Serializes starts per cluster.
    locks: Mutex<BTreeMap<ClusterId, Arc<Mutex<()>>>>,
}

impl PlanController {
    pub fn new(collaborators: Collaborators, settings: CompilerSettings) -> Result<Self> {
        let Collaborators {
            store,
            stacks,
            checks,
            scheduler,
            upgrades,
            expander,
        } = collaborators;
        let compiler = PlanCompiler::new(
            store.clone(),
            stacks.clone(),
            scheduler.clone(),
            upgrades.clone(),
            expander,
            settings,
        )?;
        Ok(Self {
            store,
            stacks,
            checks,
            scheduler,
            upgrades,
            compiler,
            metrics: None,
            locks: Mutex::new(BTreeMap::new()),
        })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.compiler = self.compiler.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// Start a plan. Exactly one request is accepted per call.
    pub fn start(&self, requests: Vec<PlanRequest>) -> Result<UpgradeEntity> {
        let mut requests = requests.into_iter();
        let (Some(request), None) = (requests.next(), requests.next()) else {
            return Err(
                UpgradeError::Validation("Can only initiate one upgrade per request.".into())
                    .into(),
            );
        };

        let direction = request.direction();
        let result = self.start_one(&request, direction);

        let label = match &result {
            Ok(_) => "success",
            Err(e) => {
                warn!(
                    "Rejected {} of {} to {}: {}",
                    direction.text(false),
                    request.cluster_name,
                    request.version,
                    e
                );
                e.downcast_ref::<UpgradeError>()
                    .map_or("error", UpgradeError::label)
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_plan_request(&request.cluster_name, direction, label);
        }
        result
    }

    fn start_one(&self, request: &PlanRequest, direction: Direction) -> Result<UpgradeEntity> {
        if request.version.is_empty() {
            return Err(UpgradeError::Validation("version is required".into()).into());
        }
        let cluster = self.store.cluster_id(&request.cluster_name)?;

        let lock = self.cluster_lock(cluster)?;
        let _guard = lock
            .lock()
            .map_err(|_| UpgradeError::poisoned("cluster plan"))?;

        let selection = self.validate(cluster, direction, request)?;
        self.create_plan(cluster, direction, request, &selection)
    }

    fn cluster_lock(&self, cluster: ClusterId) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| UpgradeError::poisoned("controller"))?;
        Ok(locks.entry(cluster).or_default().clone())
    }

    /// Locate the pack, reject conflicting plans and run prerequisite checks.
    fn validate(
        &self,
        cluster: ClusterId,
        direction: Direction,
        request: &PlanRequest,
    ) -> Result<Selection> {
        let stack = self.store.current_stack(cluster)?;

        let repo_version = match (&request.from_version, direction) {
            (Some(from), Direction::Downgrade) => from.as_str(),
            _ => request.version.as_str(),
        };
        let repository = self
            .stacks
            .repository_version(&stack.name, repo_version)?
            .ok_or_else(|| {
                UpgradeError::NotFound(format!("Repository version {repo_version} was not found"))
            })?;

        let mut packs = self.stacks.upgrade_packs(&stack)?;
        let pack = match packs.remove(&repository.upgrade_package) {
            Some(pack) => pack,
            // Pack names need not match; fall back to the pack targeting the stack.
            None => packs
                .into_values()
                .find(|p| p.target_stack.as_ref() == Some(&repository.stack))
                .ok_or_else(|| {
                    UpgradeError::NotFound(format!(
                        "Unable to perform {}. Could not locate upgrade pack {} for version {}",
                        direction.text(false),
                        repository.upgrade_package,
                        repo_version
                    ))
                })?,
        };

        for existing in self.upgrades.find_all(cluster)? {
            if existing.direction != direction {
                continue;
            }
            let status = self.calculate(existing.request_id)?.status;
            if !status.is_completed_state() {
                return Err(UpgradeError::Conflict(format!(
                    "Unable to perform {} as another {} is in progress. {} {} is in {}",
                    direction.text(false),
                    direction.text(false),
                    direction.text(true),
                    existing.request_id,
                    status
                ))
                .into());
            }
        }

        if direction.is_upgrade() && !request.skip_prerequisite_checks {
            let failed: Vec<_> = self
                .checks
                .run(&request.cluster_name, &repository)?
                .into_iter()
                .filter(|r| r.blocks(request.fail_on_warnings))
                .collect();
            if !failed.is_empty() {
                return Err(UpgradeError::PreconditionFailed {
                    message: format!(
                        "Unable to perform {}. Prerequisite checks failed {}",
                        direction.text(false),
                        serde_json::to_string(&failed)?
                    ),
                    failed,
                }
                .into());
            }
        }

        Ok(Selection { pack, repository })
    }

    fn create_plan(
        &self,
        cluster: ClusterId,
        direction: Direction,
        request: &PlanRequest,
        selection: &Selection,
    ) -> Result<UpgradeEntity> {
        let source = self.store.current_stack(cluster)?;
        let (target, resolver) = match direction {
            Direction::Upgrade => (
                selection.repository.stack.clone(),
                HostResolver::new(self.store.clone(), cluster),
            ),
            Direction::Downgrade => (
                self.store.desired_stack(cluster)?,
                HostResolver::new(self.store.clone(), cluster)
                    .with_target_version(request.version.clone()),
            ),
        };

        let downgrade_from = match direction {
            Direction::Upgrade => None,
            Direction::Downgrade => Some(match &request.from_version {
                Some(from) => from.clone(),
                None => {
                    self.upgrades
                        .find_last(cluster)?
                        .ok_or_else(|| {
                            UpgradeError::NotFound(format!(
                                "No previous upgrade found for cluster {}",
                                request.cluster_name
                            ))
                        })?
                        .to_version
                }
            }),
        };

        let pack = &selection.pack;
        let ctx = UpgradeContext::new(resolver, source, target, request.version.clone(), direction)
            .with_downgrade_from_version(downgrade_from)
            .with_skip_failures(
                request.skip_failures.unwrap_or(pack.skip_failures),
                request
                    .skip_service_check_failures
                    .unwrap_or(pack.skip_service_check_failures),
            );

        info!(
            "Starting {} of {} to {} with pack {}",
            direction.text(false),
            request.cluster_name,
            request.version,
            pack.name
        );
        self.compiler.compile(&ctx, pack)
    }

    fn calculate(&self, request: RequestId) -> Result<CalculatedStatus> {
        let summaries = self.scheduler.stage_summaries(request)?;
        Ok(CalculatedStatus::from_stage_summaries(&summaries))
    }

    /// All plans of a cluster, or the one bound to `request_id`.
    pub fn status(
        &self,
        cluster_name: &str,
        request_id: Option<RequestId>,
    ) -> Result<Vec<PlanStatus>> {
        let cluster = self.store.cluster_id(cluster_name)?;
        let upgrades = match request_id {
            Some(id) => self
                .upgrades
                .find_by_request_id(id)?
                .filter(|u| u.cluster_id == cluster)
                .into_iter()
                .collect(),
            None => self.upgrades.find_all(cluster)?,
        };

        upgrades
            .into_iter()
            .map(|upgrade| {
                let calc = self.calculate(upgrade.request_id)?;
                Ok(PlanStatus {
                    cluster_name: cluster_name.to_string(),
                    upgrade,
                    status: calc.status,
                    progress_percent: calc.percent,
                })
            })
            .collect()
    }

    /// Abort (`ABORTED`) or retry (`PENDING`) a plan.
    pub fn update(&self, cluster_name: &str, update: &PlanUpdateRequest) -> Result<UpdateOutcome> {
        let action = match update.status {
            HostRoleStatus::Aborted => "abort",
            HostRoleStatus::Pending => "retry",
            _ => "update",
        };
        let result = self.update_one(cluster_name, update);
        if let Some(metrics) = &self.metrics {
            let label = match &result {
                Ok(_) => "success",
                Err(e) => e
                    .downcast_ref::<UpgradeError>()
                    .map_or("error", UpgradeError::label),
            };
            metrics.record_control(cluster_name, action, label);
        }
        result
    }

    fn update_one(&self, cluster_name: &str, update: &PlanUpdateRequest) -> Result<UpdateOutcome> {
        let request_id = update.request_id;
        if !matches!(
            update.status,
            HostRoleStatus::Aborted | HostRoleStatus::Pending
        ) {
            return Err(UpgradeError::Validation(format!(
                "Cannot set status {}, only [ABORTED, PENDING] is allowed",
                update.status
            ))
            .into());
        }

        let cluster = self.store.cluster_id(cluster_name)?;
        self.upgrades
            .find_by_request_id(request_id)?
            .filter(|u| u.cluster_id == cluster)
            .ok_or_else(|| {
                UpgradeError::NotFound(format!(
                    "Upgrade for request {request_id} not found in cluster {cluster_name}"
                ))
            })?;

        let current = self.calculate(request_id)?.status;

        if update.status == HostRoleStatus::Aborted {
            if current.is_completed_state() {
                info!("Upgrade {request_id} is already {current}, nothing to abort");
                return Ok(UpdateOutcome::AlreadyCompleted { status: current });
            }
            let reason = update
                .reason
                .clone()
                .unwrap_or_else(|| format!("Aborting upgrade {request_id}"));
            self.scheduler.cancel_request(request_id, &reason)?;
            info!("Aborted upgrade {request_id}: {reason}");
            return Ok(UpdateOutcome::Cancelled);
        }

        if current != HostRoleStatus::Aborted {
            return Err(UpgradeError::PreconditionFailed {
                message: format!(
                    "Can only set status to {} when the upgrade is {} (currently {})",
                    HostRoleStatus::Pending,
                    HostRoleStatus::Aborted,
                    current
                ),
                failed: Vec::new(),
            }
            .into());
        }

        let task_ids: Vec<_> = self
            .scheduler
            .tasks(request_id)?
            .into_iter()
            .filter(|t| {
                matches!(
                    t.status,
                    HostRoleStatus::Aborted | HostRoleStatus::Timedout
                )
            })
            .map(|t| t.task_id)
            .collect();
        self.scheduler.resubmit_tasks(&task_ids)?;
        info!("Retrying upgrade {request_id}: {} task(s) resubmitted", task_ids.len());
        Ok(UpdateOutcome::Resubmitted {
            tasks: task_ids.len(),
        })
    }

    /// Plans are never deleted.
    pub fn delete(&self, cluster_name: &str, request_id: RequestId) -> Result<()> {
        warn!("Refusing to delete upgrade {request_id} of {cluster_name}");
        if let Some(metrics) = &self.metrics {
            metrics.record_control(cluster_name, "delete", UpgradeError::DeleteNotSupported.label());
        }
        Err(UpgradeError::DeleteNotSupported.into())
    }
}
