//! Builds per-host execution commands from an action context.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use super::command::{
    ActionContext, ExecutionCommand, RoleCommand, TargetHostType, params,
};
use super::scheduler::Stage;
use super::targets::{SelectionScope, filter_maintenance, select_candidates, select_targets};
use crate::cluster::ClusterStore;
use crate::error::UpgradeError;
use crate::model::{ClusterId, ConfigurationMap};
use crate::stack::{ComponentCategory, StackRepository};

/// Commands that address a component or service through a fixed verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomCommand {
    Restart,
    ServiceCheck,
}

impl std::fmt::Display for CustomCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restart => write!(f, "RESTART"),
            Self::ServiceCheck => write!(f, "SERVICE_CHECK"),
        }
    }
}

/// Where and as what a single command runs.
struct CommandTarget<'a> {
    host: &'a str,
    role: &'a str,
    role_command: RoleCommand,
    service: Option<&'a str>,
    component: Option<&'a str>,
    category: Option<ComponentCategory>,
}

/// Turns action contexts into host-bound execution commands on a stage.
pub struct CommandMaterializer {
    store: Arc<dyn ClusterStore>,
    stacks: Arc<dyn StackRepository>,
    default_timeout_secs: u32,
}

impl CommandMaterializer {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        stacks: Arc<dyn StackRepository>,
        default_timeout_secs: u32,
    ) -> Self {
        Self {
            store,
            stacks,
            default_timeout_secs,
        }
    }

    pub const fn default_timeout_secs(&self) -> u32 {
        self.default_timeout_secs
    }

    /// Caller timeout when it exceeds the default, otherwise the default.
    pub const fn task_timeout(&self, requested: Option<u32>) -> u32 {
        match requested {
            Some(secs) if secs > self.default_timeout_secs => secs,
            _ => self.default_timeout_secs,
        }
    }

    /// Fill the stage-wide parameters shared by every command on the stage.
    pub fn prepare_stage(&self, ctx: &ActionContext, stage: &mut Stage) -> Result<()> {
        let stack = self.store.desired_stack(stage.cluster_id)?;
        stage.command_params = ctx.parameters.clone();
        stage.host_params = BTreeMap::from([
            (params::STACK_NAME.to_string(), stack.name),
            (params::STACK_VERSION.to_string(), stack.version),
        ]);
        stage.cluster_host_info = self.store.cluster_host_info(stage.cluster_id)?;
        Ok(())
    }

    /// Add one custom-action command per selected host.
    ///
    /// Only the first resource filter is considered.
    pub fn add_action_commands(&self, ctx: &ActionContext, stage: &mut Stage) -> Result<()> {
        let cluster = stage.cluster_id;
        let filter = ctx.resource_filters.first().cloned().unwrap_or_default();
        let service = filter.service.as_deref();
        let component = filter.component.as_deref();

        let category = self.component_category(cluster, service, component)?;

        let candidates = select_candidates(self.store.as_ref(), cluster, service, component)?;
        let (candidates, _) = filter_maintenance(candidates, |host| {
            self.is_disallowed(ctx, cluster, service, component, host)
        })?;

        let scope = SelectionScope {
            cluster: &ctx.cluster_name,
            service,
            component,
            action: &ctx.action_name,
        };
        let targets = select_targets(scope, ctx.target_type, &filter.hosts, candidates, |c| {
            self.store.healthy_host(cluster, c)
        })?;

        for host in &targets {
            let mut command = self.build_command(
                ctx,
                cluster,
                &CommandTarget {
                    host,
                    role: &ctx.action_name,
                    role_command: RoleCommand::ActionExecute,
                    service,
                    component,
                    category,
                },
            )?;
            command
                .command_params
                .insert(params::SCRIPT.to_string(), format!("{}.py", ctx.action_name));
            command.command_params.insert(
                params::SCRIPT_TYPE.to_string(),
                params::SCRIPT_TYPE_PYTHON.to_string(),
            );
            stage.commands.push(command);
        }

        debug!(
            "Stage {}: {} on {} host(s)",
            stage.stage_id,
            ctx.action_name,
            targets.len()
        );
        Ok(())
    }

    /// Add restart or service-check commands, one resource filter at a time.
    pub fn add_custom_commands(
        &self,
        ctx: &ActionContext,
        custom: CustomCommand,
        stage: &mut Stage,
    ) -> Result<()> {
        let cluster = stage.cluster_id;
        for filter in &ctx.resource_filters {
            let service = filter.service.as_deref().ok_or_else(|| {
                UpgradeError::Validation(format!("{custom} requires a service name"))
            })?;

            match custom {
                CustomCommand::Restart => {
                    let component = filter.component.as_deref().ok_or_else(|| {
                        UpgradeError::Validation(format!("{custom} requires a component name"))
                    })?;
                    let requested: BTreeSet<String> = if filter.hosts.is_empty() {
                        self.store.component_hosts(cluster, service, component)?
                    } else {
                        filter.hosts.iter().cloned().collect()
                    };
                    let declared = !requested.is_empty();
                    let (hosts, _) = filter_maintenance(requested, |host| {
                        self.is_disallowed(ctx, cluster, Some(service), Some(component), host)
                    })?;
                    // A task-less stage never completes.
                    if declared && hosts.is_empty() {
                        return Err(UpgradeError::NoSuitableHosts {
                            cluster: ctx.cluster_name.clone(),
                            service: service.to_string(),
                            component: component.to_string(),
                            action: ctx.action_name.clone(),
                        }
                        .into());
                    }
                    let category = self.component_category(cluster, Some(service), Some(component))?;

                    for host in &hosts {
                        let mut command = self.build_command(
                            ctx,
                            cluster,
                            &CommandTarget {
                                host,
                                role: component,
                                role_command: RoleCommand::CustomCommand,
                                service: Some(service),
                                component: Some(component),
                                category,
                            },
                        )?;
                        command
                            .command_params
                            .insert(params::CUSTOM_COMMAND.to_string(), custom.to_string());
                        stage.commands.push(command);
                    }
                }
                CustomCommand::ServiceCheck => {
                    let candidates =
                        select_candidates(self.store.as_ref(), cluster, Some(service), None)?;
                    let (candidates, _) = filter_maintenance(candidates, |host| {
                        self.is_disallowed(ctx, cluster, Some(service), None, host)
                    })?;
                    let scope = SelectionScope {
                        cluster: &ctx.cluster_name,
                        service: Some(service),
                        component: None,
                        action: &ctx.action_name,
                    };
                    let targets = select_targets(
                        scope,
                        TargetHostType::Any,
                        &filter.hosts,
                        candidates,
                        |c| self.store.healthy_host(cluster, c),
                    )?;
                    let role = format!("{service}_SERVICE_CHECK");
                    for host in &targets {
                        let command = self.build_command(
                            ctx,
                            cluster,
                            &CommandTarget {
                                host,
                                role: &role,
                                role_command: RoleCommand::ServiceCheck,
                                service: Some(service),
                                component: None,
                                category: None,
                            },
                        )?;
                        stage.commands.push(command);
                    }
                }
            }
        }
        Ok(())
    }

    fn is_disallowed(
        &self,
        ctx: &ActionContext,
        cluster: ClusterId,
        service: Option<&str>,
        component: Option<&str>,
        host: &str,
    ) -> Result<bool> {
        Ok(!self.store.is_operation_allowed(
            cluster,
            ctx.operation_level,
            service,
            component,
            host,
        )?)
    }

    fn component_category(
        &self,
        cluster: ClusterId,
        service: Option<&str>,
        component: Option<&str>,
    ) -> Result<Option<ComponentCategory>> {
        let (Some(service), Some(component)) = (service, component) else {
            return Ok(None);
        };
        let stack = self.store.desired_stack(cluster)?;
        Ok(self
            .stacks
            .component(&stack, service, component)?
            .map(|info| info.category))
    }

    fn build_command(
        &self,
        ctx: &ActionContext,
        cluster: ClusterId,
        target: &CommandTarget<'_>,
    ) -> Result<ExecutionCommand> {
        let timeout = self.task_timeout(ctx.timeout_secs);

        let command_params = BTreeMap::from([(
            params::COMMAND_TIMEOUT.to_string(),
            timeout.to_string(),
        )]);

        let mut role_params = ctx.parameters.clone();
        if let Some(category) = target.category {
            role_params.insert(params::COMPONENT_CATEGORY.to_string(), category.to_string());
        }

        let force_refresh_config_tags = ctx
            .parameters
            .get(params::REFRESH_CONFIG_TAGS_BEFORE_EXECUTION)
            .map(|v| v.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        Ok(ExecutionCommand {
            host: target.host.to_string(),
            role: target.role.to_string(),
            role_command: target.role_command,
            service_name: target.service.map(String::from),
            component_name: target.component.map(String::from),
            command_params,
            role_params,
            configurations: ConfigurationMap::new(),
            configuration_tags: self.store.config_tags_with_overrides(cluster, target.host)?,
            force_refresh_config_tags,
            cluster_host_info: self.store.cluster_host_info(cluster)?,
            retry_allowed: ctx.retry_allowed,
            auto_skip_failures: ctx.auto_skip_failures,
            command_detail: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterSpec, MemoryClusterStore};
    use crate::execution::command::RequestResourceFilter;
    use crate::model::StageId;
    use crate::stack::{MemoryStackRepository, StackDefinition};

    struct Fixture {
        store: Arc<MemoryClusterStore>,
        materializer: CommandMaterializer,
        cluster: ClusterId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryClusterStore::new());
        let spec: ClusterSpec = serde_yaml::from_str(
            r"
name: c1
current_stack: HDP-2.2
current_version: 2.2.0.0
hosts:
  h1: {}
  h2: {}
  h3: {}
  h4: { healthy: false }
services:
  HDFS:
    components:
      NAMENODE: { hosts: [h1] }
      DATANODE: { hosts: [h2, h3, h4] }
desired_configs:
  hdfs-site: { dfs.replication: '3' }
  core-site: { fs.defaultFS: 'hdfs://h1:8020' }
",
        )
        .unwrap();
        let cluster = store.add_cluster(spec).unwrap();

        let stacks = Arc::new(MemoryStackRepository::new());
        let definition: StackDefinition = serde_yaml::from_str(
            r"
id: HDP-2.2
services:
  HDFS:
    components:
      NAMENODE: { category: MASTER }
      DATANODE: { category: SLAVE }
",
        )
        .unwrap();
        stacks.add_stack(definition).unwrap();

        Fixture {
            materializer: CommandMaterializer::new(store.clone(), stacks, 900),
            store,
            cluster,
        }
    }

    fn context(filter: RequestResourceFilter) -> ActionContext {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            params::REFRESH_CONFIG_TAGS_BEFORE_EXECUTION.to_string(),
            "hdfs-site core-site".to_string(),
        );
        ActionContext::new("c1", "ru_execute_tasks", vec![filter], parameters)
    }

    fn stage(f: &Fixture) -> Stage {
        Stage::new(StageId(1), f.cluster, "c1", "Upgrading to 2.2.1.0")
    }

    #[test]
    fn test_task_timeout() {
        let f = fixture();
        assert_eq!(f.materializer.task_timeout(None), 900);
        assert_eq!(f.materializer.task_timeout(Some(60)), 900);
        assert_eq!(f.materializer.task_timeout(Some(1800)), 1800);
    }

    #[test]
    fn test_action_commands_all_component_hosts() {
        let f = fixture();
        let ctx = context(RequestResourceFilter::new(Some("HDFS"), Some("DATANODE"), vec![]));
        let mut stage = stage(&f);
        f.materializer.add_action_commands(&ctx, &mut stage).unwrap();

        assert_eq!(stage.commands.len(), 3);
        let cmd = &stage.commands[0];
        assert_eq!(cmd.role, "ru_execute_tasks");
        assert_eq!(cmd.command_params[params::SCRIPT], "ru_execute_tasks.py");
        assert_eq!(cmd.command_params[params::SCRIPT_TYPE], "PYTHON");
        assert_eq!(cmd.command_params[params::COMMAND_TIMEOUT], "900");
        assert_eq!(cmd.role_params[params::COMPONENT_CATEGORY], "SLAVE");
        assert!(cmd.configurations.is_empty());
        assert!(cmd.configuration_tags.contains_key("hdfs-site"));
        assert_eq!(cmd.force_refresh_config_tags.len(), 2);
        assert!(cmd.cluster_host_info.contains_key("all_hosts"));
    }

    #[test]
    fn test_action_commands_skip_maintenance_hosts() {
        let f = fixture();
        f.store.set_host_maintenance(f.cluster, "h3", true).unwrap();
        let ctx = context(RequestResourceFilter::new(Some("HDFS"), Some("DATANODE"), vec![]));
        let mut stage = stage(&f);
        f.materializer.add_action_commands(&ctx, &mut stage).unwrap();
        let hosts: Vec<&str> = stage.commands.iter().map(|c| c.host.as_str()).collect();
        assert_eq!(hosts, vec!["h2", "h4"]);
    }

    #[test]
    fn test_action_commands_any_prefers_healthy() {
        let f = fixture();
        let mut ctx = context(RequestResourceFilter::new(Some("HDFS"), None, vec![]));
        ctx.target_type = TargetHostType::Any;
        let mut stage = stage(&f);
        f.materializer.add_action_commands(&ctx, &mut stage).unwrap();
        assert_eq!(stage.commands.len(), 1);
        assert_ne!(stage.commands[0].host, "h4");
    }

    #[test]
    fn test_action_commands_explicit_host_not_candidate() {
        let f = fixture();
        let ctx = context(RequestResourceFilter::new(
            Some("HDFS"),
            Some("NAMENODE"),
            vec!["h2".to_string()],
        ));
        let mut stage = stage(&f);
        let err = f
            .materializer
            .add_action_commands(&ctx, &mut stage)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::HostNotCandidate { .. })
        ));
        assert!(stage.commands.is_empty());
    }

    #[test]
    fn test_action_commands_no_suitable_hosts() {
        let f = fixture();
        f.store.set_host_maintenance(f.cluster, "h1", true).unwrap();
        let ctx = context(RequestResourceFilter::new(Some("HDFS"), Some("NAMENODE"), vec![]));
        let mut stage = stage(&f);
        let err = f
            .materializer
            .add_action_commands(&ctx, &mut stage)
            .unwrap_err();
        assert!(err.to_string().starts_with("Suitable hosts not found"));
    }

    #[test]
    fn test_restart_commands() {
        let f = fixture();
        let ctx = ActionContext::new(
            "c1",
            "RESTART",
            vec![
                RequestResourceFilter::new(Some("HDFS"), Some("NAMENODE"), vec!["h1".into()]),
                RequestResourceFilter::new(
                    Some("HDFS"),
                    Some("DATANODE"),
                    vec!["h2".into(), "h3".into()],
                ),
            ],
            BTreeMap::new(),
        );
        let mut stage = stage(&f);
        f.materializer
            .add_custom_commands(&ctx, CustomCommand::Restart, &mut stage)
            .unwrap();
        let roles: Vec<(&str, &str)> = stage
            .commands
            .iter()
            .map(|c| (c.role.as_str(), c.host.as_str()))
            .collect();
        assert_eq!(
            roles,
            vec![("NAMENODE", "h1"), ("DATANODE", "h2"), ("DATANODE", "h3")]
        );
        assert_eq!(stage.commands[0].command_params[params::CUSTOM_COMMAND], "RESTART");
        assert_eq!(stage.commands[0].role_params[params::COMPONENT_CATEGORY], "MASTER");
    }

    #[test]
    fn test_service_check_picks_one_host() {
        let f = fixture();
        let ctx = ActionContext::new(
            "c1",
            "SERVICE_CHECK",
            vec![RequestResourceFilter::new(Some("HDFS"), None, vec![])],
            BTreeMap::new(),
        );
        let mut stage = stage(&f);
        f.materializer
            .add_custom_commands(&ctx, CustomCommand::ServiceCheck, &mut stage)
            .unwrap();
        assert_eq!(stage.commands.len(), 1);
        assert_eq!(stage.commands[0].role, "HDFS_SERVICE_CHECK");
        assert_eq!(stage.commands[0].role_command, RoleCommand::ServiceCheck);
    }

    #[test]
    fn test_prepare_stage() {
        let f = fixture();
        let ctx = context(RequestResourceFilter::default());
        let mut stage = stage(&f);
        f.materializer.prepare_stage(&ctx, &mut stage).unwrap();
        assert_eq!(stage.host_params[params::STACK_NAME], "HDP");
        assert_eq!(stage.host_params[params::STACK_VERSION], "2.2");
        assert!(
            stage
                .command_params
                .contains_key(params::REFRESH_CONFIG_TAGS_BEFORE_EXECUTION)
        );
    }
}
