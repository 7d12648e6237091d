//! Execution requests, stages and the scheduler that dispatches them.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use super::command::ExecutionCommand;
use crate::error::UpgradeError;
use crate::model::{ClusterId, HostRoleStatus, RequestId, StageId, StageSummary, TaskId};

/// Host name recorded for tasks that run inside the orchestrator.
pub const SERVER_ACTION_HOST: &str = "ruo-server";

/// Role recorded for server-side tasks.
pub const SERVER_ACTION_ROLE: &str = "RUO_SERVER_ACTION";

/// A task run by the orchestrator itself rather than an agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAction {
    /// Task kind implementing the action (e.g. `MANUAL`, `CONFIGURE`).
    pub implementation: String,
    pub command_params: BTreeMap<String, String>,
    pub timeout_secs: u32,
    pub detail: String,
    pub retry_allowed: bool,
    pub auto_skip_failures: bool,
}

/// One stage of an execution request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub stage_id: StageId,
    pub cluster_id: ClusterId,
    pub cluster_name: String,
    pub request_context: String,
    pub text: String,
    pub skippable: bool,
    pub command_params: BTreeMap<String, String>,
    pub host_params: BTreeMap<String, String>,
    pub cluster_host_info: BTreeMap<String, Vec<String>>,
    pub commands: Vec<ExecutionCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_action: Option<ServerAction>,
}

impl Stage {
    pub fn new(
        stage_id: StageId,
        cluster_id: ClusterId,
        cluster_name: impl Into<String>,
        request_context: impl Into<String>,
    ) -> Self {
        Self {
            stage_id,
            cluster_id,
            cluster_name: cluster_name.into(),
            request_context: request_context.into(),
            text: String::new(),
            skippable: false,
            command_params: BTreeMap::new(),
            host_params: BTreeMap::new(),
            cluster_host_info: BTreeMap::new(),
            commands: Vec::new(),
            server_action: None,
        }
    }

    pub fn task_count(&self) -> usize {
        self.commands.len() + if self.server_action.is_some() { 1 } else { 0 }
    }
}

/// All stages of one plan, submitted together.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub id: RequestId,
    pub cluster_id: ClusterId,
    pub context: String,
    pub stages: Vec<Stage>,
}

impl ExecutionRequest {
    pub fn new(id: RequestId, cluster_id: ClusterId, context: impl Into<String>) -> Self {
        Self {
            id,
            cluster_id,
            context: context.into(),
            stages: Vec::new(),
        }
    }

    /// Highest stage id so far, 0 when empty.
    pub fn last_stage_id(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.stage_id.get())
            .max()
            .unwrap_or(0)
    }

    pub fn add_stage(&mut self, stage: Stage) {
        self.stages.push(stage);
    }
}

/// A dispatched task and its last known status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub stage_id: StageId,
    pub host: String,
    pub role: String,
    pub status: HostRoleStatus,
}

/// Dispatches stages to agents and tracks their tasks.
pub trait ExecutionScheduler: Send + Sync {
    fn next_request_id(&self) -> RequestId;
    fn submit(&self, request: ExecutionRequest) -> Result<()>;
    fn stage_summaries(&self, request: RequestId) -> Result<BTreeMap<StageId, StageSummary>>;
    fn tasks(&self, request: RequestId) -> Result<Vec<TaskRecord>>;
    /// Abort every task of the request that has not completed.
    fn cancel_request(&self, request: RequestId, reason: &str) -> Result<()>;
    /// Put the given tasks back to pending.
    fn resubmit_tasks(&self, tasks: &[TaskId]) -> Result<()>;
}

#[derive(Debug)]
struct RequestState {
    request: ExecutionRequest,
    tasks: Vec<TaskRecord>,
    abort_reason: Option<String>,
}

/// Scheduler keeping requests and task status in memory.
#[derive(Debug)]
pub struct MemoryScheduler {
    next_request: AtomicU64,
    next_task: AtomicU64,
    requests: RwLock<BTreeMap<RequestId, RequestState>>,
}

impl Default for MemoryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self {
            next_request: AtomicU64::new(1),
            next_task: AtomicU64::new(1),
            requests: RwLock::new(BTreeMap::new()),
        }
    }

    /// The submitted request, as dispatched.
    pub fn request(&self, request: RequestId) -> Result<ExecutionRequest> {
        let requests = self
            .requests
            .read()
            .map_err(|_| UpgradeError::poisoned("scheduler"))?;
        requests
            .get(&request)
            .map(|s| s.request.clone())
            .ok_or_else(|| UpgradeError::NotFound(format!("Request {request} not found")).into())
    }

    pub fn abort_reason(&self, request: RequestId) -> Result<Option<String>> {
        let requests = self
            .requests
            .read()
            .map_err(|_| UpgradeError::poisoned("scheduler"))?;
        Ok(requests.get(&request).and_then(|s| s.abort_reason.clone()))
    }

    #[cfg(test)]
    pub fn set_task_status(&self, task: TaskId, status: HostRoleStatus) -> Result<()> {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| UpgradeError::poisoned("scheduler"))?;
        for state in requests.values_mut() {
            if let Some(record) = state.tasks.iter_mut().find(|t| t.task_id == task) {
                record.status = status;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn set_request_status(&self, request: RequestId, status: HostRoleStatus) -> Result<()> {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| UpgradeError::poisoned("scheduler"))?;
        if let Some(state) = requests.get_mut(&request) {
            for record in &mut state.tasks {
                record.status = status;
            }
        }
        Ok(())
    }

    fn with_request<T>(
        &self,
        request: RequestId,
        f: impl FnOnce(&RequestState) -> T,
    ) -> Result<T> {
        let requests = self
            .requests
            .read()
            .map_err(|_| UpgradeError::poisoned("scheduler"))?;
        let state = requests
            .get(&request)
            .ok_or_else(|| UpgradeError::NotFound(format!("Request {request} not found")))?;
        Ok(f(state))
    }
}

impl ExecutionScheduler for MemoryScheduler {
    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::SeqCst))
    }

    fn submit(&self, request: ExecutionRequest) -> Result<()> {
        let mut tasks = Vec::new();
        for stage in &request.stages {
            for command in &stage.commands {
                tasks.push(TaskRecord {
                    task_id: TaskId(self.next_task.fetch_add(1, Ordering::SeqCst)),
                    stage_id: stage.stage_id,
                    host: command.host.clone(),
                    role: command.role.clone(),
                    status: HostRoleStatus::Pending,
                });
            }
            if stage.server_action.is_some() {
                tasks.push(TaskRecord {
                    task_id: TaskId(self.next_task.fetch_add(1, Ordering::SeqCst)),
                    stage_id: stage.stage_id,
                    host: SERVER_ACTION_HOST.to_string(),
                    role: SERVER_ACTION_ROLE.to_string(),
                    status: HostRoleStatus::Pending,
                });
            }
        }

        info!(
            "Submitted request {} ({}) with {} stages and {} tasks",
            request.id,
            request.context,
            request.stages.len(),
            tasks.len()
        );

        let mut requests = self
            .requests
            .write()
            .map_err(|_| UpgradeError::poisoned("scheduler"))?;
        if requests.contains_key(&request.id) {
            return Err(
                UpgradeError::Conflict(format!("Request {} already submitted", request.id)).into(),
            );
        }
        requests.insert(
            request.id,
            RequestState {
                request,
                tasks,
                abort_reason: None,
            },
        );
        Ok(())
    }

    fn stage_summaries(&self, request: RequestId) -> Result<BTreeMap<StageId, StageSummary>> {
        self.with_request(request, |state| {
            let mut summaries: BTreeMap<StageId, StageSummary> = state
                .request
                .stages
                .iter()
                .map(|s| (s.stage_id, StageSummary::new(s.skippable)))
                .collect();
            for task in &state.tasks {
                if let Some(summary) = summaries.get_mut(&task.stage_id) {
                    summary.record(task.status);
                }
            }
            summaries
        })
    }

    fn tasks(&self, request: RequestId) -> Result<Vec<TaskRecord>> {
        self.with_request(request, |state| state.tasks.clone())
    }

    fn cancel_request(&self, request: RequestId, reason: &str) -> Result<()> {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| UpgradeError::poisoned("scheduler"))?;
        let state = requests
            .get_mut(&request)
            .ok_or_else(|| UpgradeError::NotFound(format!("Request {request} not found")))?;

        let mut aborted = 0;
        for task in &mut state.tasks {
            if !task.status.is_completed_state() {
                task.status = HostRoleStatus::Aborted;
                aborted += 1;
            }
        }
        state.abort_reason = Some(reason.to_string());
        info!("Cancelled request {}: {} ({} tasks aborted)", request, reason, aborted);
        Ok(())
    }

    fn resubmit_tasks(&self, tasks: &[TaskId]) -> Result<()> {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| UpgradeError::poisoned("scheduler"))?;
        for state in requests.values_mut() {
            for task in &mut state.tasks {
                if tasks.contains(&task.task_id) {
                    debug!("Resubmitting task {} on {}", task.task_id, task.host);
                    task.status = HostRoleStatus::Pending;
                }
            }
        }
        Ok(())
    }
}
