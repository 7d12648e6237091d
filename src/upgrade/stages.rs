//! Type-specific builders turning one plan item into one scheduler stage.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use super::context::UpgradeContext;
use super::sequence::{StageType, StageWrapper, UpgradeGroupHolder};
use crate::cluster::{ClusterStore, OperationLevel};
use crate::error::UpgradeError;
use crate::execution::command::params;
use crate::execution::{
    ActionContext, CommandMaterializer, CustomCommand, ExecutionRequest, RequestResourceFilter,
    ServerAction, Stage,
};
use crate::model::pack::PARAMETER_CONFIG_TYPE;
use crate::model::{StageId, Task, UpgradeItemEntity};
use crate::stack::StackRepository;

/// Custom action running script functions on agents.
pub const EXECUTE_TASKS_ACTION: &str = "ru_execute_tasks";

/// Longest stage text kept for server-side stages.
const MAX_STAGE_TEXT: usize = 255;

/// Everything a builder needs about the item it is turning into a stage.
pub struct StageInput<'a> {
    pub ctx: &'a UpgradeContext,
    pub cluster_name: &'a str,
    pub group: &'a UpgradeGroupHolder,
    pub wrapper: &'a StageWrapper,
    /// The single task of an exploded server-side item.
    pub task: Option<&'a Task>,
}

/// Builds and appends stages to an execution request.
pub struct StageFactory {
    store: Arc<dyn ClusterStore>,
    stacks: Arc<dyn StackRepository>,
    materializer: CommandMaterializer,
    server_action_timeout_secs: u32,
}

impl StageFactory {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        stacks: Arc<dyn StackRepository>,
        agent_timeout_secs: u32,
        server_action_timeout_secs: u32,
    ) -> Self {
        Self {
            materializer: CommandMaterializer::new(store.clone(), stacks.clone(), agent_timeout_secs),
            store,
            stacks,
            server_action_timeout_secs,
        }
    }

    /// Append the stage for `item`, assigning it the next stage id.
    pub fn make_stage(
        &self,
        request: &mut ExecutionRequest,
        input: &StageInput<'_>,
        item: &mut UpgradeItemEntity,
    ) -> Result<StageId> {
        let stage_id = StageId::next_after(request.last_stage_id());
        let stage = match input.wrapper.stage_type {
            StageType::RuTasks => self.make_action_stage(request, input, item, stage_id)?,
            StageType::Restart => self.make_restart_stage(request, input, item, stage_id)?,
            StageType::ServiceCheck => {
                self.make_service_check_stage(request, input, item, stage_id)?
            }
            StageType::ServerSideAction => {
                self.make_server_side_stage(request, input, item, stage_id)?
            }
        };

        debug!(
            "Stage {} ({}): '{}' with {} task(s)",
            stage_id,
            input.wrapper.stage_type,
            stage.text,
            stage.task_count()
        );
        item.stage_id = stage_id;
        request.add_stage(stage);
        Ok(stage_id)
    }

    fn new_stage(
        request: &ExecutionRequest,
        input: &StageInput<'_>,
        stage_id: StageId,
        text: String,
    ) -> Stage {
        let mut stage = Stage::new(
            stage_id,
            request.cluster_id,
            input.cluster_name,
            &request.context,
        );
        stage.text = text;
        stage.skippable = input.group.skippable;
        stage
    }

    fn make_action_stage(
        &self,
        request: &ExecutionRequest,
        input: &StageInput<'_>,
        item: &UpgradeItemEntity,
        stage_id: StageId,
    ) -> Result<Stage> {
        let hosts = input.wrapper.hosts();
        if hosts.is_empty() {
            return Err(UpgradeError::Validation(format!(
                "Cannot create action for '{}' with no hosts",
                input.wrapper.text
            ))
            .into());
        }

        let mut parameters = input.ctx.common_parameters();
        parameters.insert(params::TASKS.to_string(), item.tasks.clone());

        if let Some(service) = input.wrapper.tasks.first().and_then(|t| t.service.as_deref()) {
            let stack = self.store.desired_stack(request.cluster_id)?;
            let info = self.stacks.service(&stack, service)?;
            parameters.insert(params::SERVICE_PACKAGE_FOLDER.to_string(), info.package_folder);
            parameters.insert(
                params::HOOKS_FOLDER.to_string(),
                self.stacks.hooks_folder(&stack)?,
            );
        }

        let mut action = ActionContext::new(
            input.cluster_name,
            EXECUTE_TASKS_ACTION,
            vec![RequestResourceFilter::new(None, None, hosts.into_iter().collect())],
            parameters,
        );
        action.timeout_secs = Some(self.materializer.default_timeout_secs());
        action.retry_allowed = input.group.allow_retry;
        action.auto_skip_failures = input.ctx.skip_component_failures();

        let mut stage = Self::new_stage(request, input, stage_id, item.text.clone());
        self.materializer.prepare_stage(&action, &mut stage)?;
        self.materializer.add_action_commands(&action, &mut stage)?;
        for command in &mut stage.commands {
            command.command_detail = Some(item.text.clone());
        }
        Ok(stage)
    }

    fn make_restart_stage(
        &self,
        request: &ExecutionRequest,
        input: &StageInput<'_>,
        item: &UpgradeItemEntity,
        stage_id: StageId,
    ) -> Result<Stage> {
        let filters = input
            .wrapper
            .tasks
            .iter()
            .map(|tw| {
                RequestResourceFilter::new(
                    tw.service.as_deref(),
                    tw.component.as_deref(),
                    tw.hosts.iter().cloned().collect(),
                )
            })
            .collect();

        let mut parameters = input.ctx.common_parameters();
        parameters.insert(
            params::RESTART_TYPE.to_string(),
            params::ROLLING_UPGRADE.to_string(),
        );

        let mut action = ActionContext::new(
            input.cluster_name,
            CustomCommand::Restart.to_string(),
            filters,
            parameters,
        );
        action.operation_level = OperationLevel::HostComponent;
        action.timeout_secs = Some(self.materializer.default_timeout_secs());
        action.retry_allowed = input.group.allow_retry;
        action.auto_skip_failures = input.ctx.skip_component_failures();

        let mut stage = Self::new_stage(request, input, stage_id, item.text.clone());
        self.materializer.prepare_stage(&action, &mut stage)?;
        stage.command_params.insert(
            params::COMMAND.to_string(),
            CustomCommand::Restart.to_string(),
        );
        self.materializer
            .add_custom_commands(&action, CustomCommand::Restart, &mut stage)?;
        Ok(stage)
    }

    fn make_service_check_stage(
        &self,
        request: &ExecutionRequest,
        input: &StageInput<'_>,
        item: &UpgradeItemEntity,
        stage_id: StageId,
    ) -> Result<Stage> {
        let filters = input
            .wrapper
            .tasks
            .iter()
            .map(|tw| RequestResourceFilter::new(tw.service.as_deref(), None, Vec::new()))
            .collect();

        let mut action = ActionContext::new(
            input.cluster_name,
            CustomCommand::ServiceCheck.to_string(),
            filters,
            input.ctx.common_parameters(),
        );
        action.operation_level = OperationLevel::Service;
        action.timeout_secs = Some(self.materializer.default_timeout_secs());
        action.retry_allowed = input.group.allow_retry;
        action.auto_skip_failures = input.ctx.skip_service_check_failures();

        let mut stage = Self::new_stage(request, input, stage_id, item.text.clone());
        self.materializer.prepare_stage(&action, &mut stage)?;
        stage.command_params.insert(
            params::COMMAND.to_string(),
            CustomCommand::ServiceCheck.to_string(),
        );
        self.materializer
            .add_custom_commands(&action, CustomCommand::ServiceCheck, &mut stage)?;
        Ok(stage)
    }

    fn make_server_side_stage(
        &self,
        request: &ExecutionRequest,
        input: &StageInput<'_>,
        item: &mut UpgradeItemEntity,
        stage_id: StageId,
    ) -> Result<Stage> {
        let task = input.task.ok_or_else(|| {
            UpgradeError::Validation(format!(
                "Server side stage '{}' has no task",
                input.wrapper.text
            ))
        })?;

        let mut parameters: BTreeMap<String, String> = input.ctx.common_parameters();
        parameters.insert(params::CLUSTER_NAME.to_string(), input.cluster_name.to_string());

        let mut item_detail = item.text.clone();
        let mut stage_text = abbreviate(&item.text, MAX_STAGE_TEXT);

        match task {
            Task::Manual(manual) => {
                item_detail.clone_from(&manual.message);
                if let Some(summary) = &manual.summary {
                    stage_text.clone_from(summary);
                }
                item.text.clone_from(&manual.message);
                if let Some(out) = &manual.structured_out {
                    parameters.insert(params::STRUCTURED_OUT.to_string(), out.clone());
                }
            }
            Task::Configure(configure) => {
                let desired = self.store.desired_configs(request.cluster_id)?;
                let changes = configure.configuration_changes(&desired);
                item_detail = match changes.get(PARAMETER_CONFIG_TYPE) {
                    Some(config_type) => format!("Updating configuration {config_type}"),
                    None => "Skipping Configuration Task".to_string(),
                };
                parameters.extend(changes);
                item.text.clone_from(&item_detail);
                stage_text = configure
                    .summary
                    .clone()
                    .unwrap_or_else(|| item_detail.clone());
            }
            Task::Restart | Task::ServiceCheck | Task::Execute(_) => {}
        }

        let mut action = ActionContext::new(
            input.cluster_name,
            task.kind().to_string(),
            Vec::new(),
            parameters.clone(),
        );
        action.retry_allowed = input.group.allow_retry;
        action.auto_skip_failures = input.ctx.skip_component_failures();

        let mut stage = Self::new_stage(request, input, stage_id, stage_text);
        self.materializer.prepare_stage(&action, &mut stage)?;
        stage.server_action = Some(ServerAction {
            implementation: task.kind().to_string(),
            command_params: parameters,
            timeout_secs: self.server_action_timeout_secs,
            detail: item_detail,
            retry_allowed: action.retry_allowed,
            auto_skip_failures: action.auto_skip_failures,
        });
        Ok(stage)
    }
}

/// Shorten to `max` characters, ending in "..." when cut.
fn abbreviate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
