//! Expansion of an upgrade pack into ordered groups of stage wrappers.

use std::collections::BTreeSet;

use anyhow::{Context as _, Result};
use serde::Serialize;
use tracing::{debug, warn};

use super::context::UpgradeContext;
use crate::model::pack::{ClusterStage, Grouping, OrderService};
use crate::model::{GroupingKind, Task, UpgradePack};

/// How a stage wrapper is turned into scheduler stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageType {
    Restart,
    ServiceCheck,
    /// Custom script functions run through `ru_execute_tasks`.
    RuTasks,
    ServerSideAction,
}

impl std::fmt::Display for StageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restart => write!(f, "RESTART"),
            Self::ServiceCheck => write!(f, "SERVICE_CHECK"),
            Self::RuTasks => write!(f, "RU_TASKS"),
            Self::ServerSideAction => write!(f, "SERVER_SIDE_ACTION"),
        }
    }
}

/// Tasks bound to a service/component and the hosts they run on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskWrapper {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub hosts: BTreeSet<String>,
    pub tasks: Vec<Task>,
}

impl TaskWrapper {
    pub fn new(
        service: Option<&str>,
        component: Option<&str>,
        hosts: BTreeSet<String>,
        tasks: Vec<Task>,
    ) -> Self {
        Self {
            service: service.map(String::from),
            component: component.map(String::from),
            hosts,
            tasks,
        }
    }
}

/// One unit of plan work of a single stage type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageWrapper {
    pub stage_type: StageType,
    pub text: String,
    pub tasks: Vec<TaskWrapper>,
}

impl StageWrapper {
    pub fn new(stage_type: StageType, text: impl Into<String>, tasks: Vec<TaskWrapper>) -> Self {
        Self {
            stage_type,
            text: text.into(),
            tasks,
        }
    }

    /// Union of every wrapped task's hosts.
    pub fn hosts(&self) -> BTreeSet<String> {
        self.tasks
            .iter()
            .flat_map(|t| t.hosts.iter().cloned())
            .collect()
    }

    pub fn tasks_json(&self) -> Result<String> {
        serde_json::to_string(&self.tasks).context("Failed to serialize stage tasks")
    }

    pub fn hosts_json(&self) -> Result<String> {
        serde_json::to_string(&self.hosts()).context("Failed to serialize stage hosts")
    }
}

/// One ordered phase of the plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpgradeGroupHolder {
    pub name: String,
    pub title: String,
    pub skippable: bool,
    pub allow_retry: bool,
    pub items: Vec<StageWrapper>,
}

impl UpgradeGroupHolder {
    fn from_grouping(grouping: &Grouping) -> Self {
        Self {
            name: grouping.name.clone(),
            title: grouping.title.clone(),
            skippable: grouping.skippable,
            allow_retry: grouping.allow_retry,
            items: Vec::new(),
        }
    }
}

/// Turns a pack into ordered groups for one plan.
pub trait SequenceExpander: Send + Sync {
    fn create_sequence(
        &self,
        pack: &UpgradePack,
        ctx: &UpgradeContext,
    ) -> Result<Vec<UpgradeGroupHolder>>;
}

// ============================================================================
// Pack expander
// ============================================================================

/// Expands restart, service-check and cluster groupings against live cluster layout.
///
/// Groups are reversed for downgrades, as are the services and components
/// inside restart groupings. Groups without any stage are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackExpander;

impl PackExpander {
    pub const fn new() -> Self {
        Self
    }

    fn expand_restart(
        pack: &UpgradePack,
        grouping: &Grouping,
        ctx: &UpgradeContext,
    ) -> Result<Vec<StageWrapper>> {
        let direction = ctx.direction();
        let resolver = ctx.resolver();
        let mut services: Vec<&OrderService> = grouping.services.iter().collect();
        if direction.is_downgrade() {
            services.reverse();
        }

        let mut stages = Vec::new();
        for service in services {
            let mut components: Vec<&String> = service.components.iter().collect();
            if direction.is_downgrade() {
                components.reverse();
            }

            for component in components {
                let hosts = resolver.hosts_for(&service.name, component)?;
                if hosts.is_empty() {
                    debug!(
                        "No hosts to restart for {}/{}, skipping",
                        service.name, component
                    );
                    continue;
                }

                let processing = pack.processing_for(&service.name, component);
                if let Some(p) = processing {
                    stages.extend(wrap_component_tasks(
                        p.pre_tasks(direction),
                        &service.name,
                        component,
                        &hosts,
                        "Preparing",
                    ));
                }

                let text = if hosts.len() == 1 {
                    format!(
                        "Restarting {component} on {}",
                        hosts.iter().next().map_or("", String::as_str)
                    )
                } else {
                    format!("Restarting {component} on {} hosts", hosts.len())
                };
                stages.push(StageWrapper::new(
                    StageType::Restart,
                    text,
                    vec![TaskWrapper::new(
                        Some(&service.name),
                        Some(component),
                        hosts.clone(),
                        vec![Task::Restart],
                    )],
                ));

                if let Some(p) = processing {
                    stages.extend(wrap_component_tasks(
                        p.post_tasks(direction),
                        &service.name,
                        component,
                        &hosts,
                        "Finalizing",
                    ));
                }
            }
        }
        Ok(stages)
    }

    fn expand_service_checks(grouping: &Grouping, ctx: &UpgradeContext) -> Result<Vec<StageWrapper>> {
        let mut stages = Vec::new();
        for service in &grouping.services {
            if !ctx.resolver().has_service(&service.name)? {
                debug!("Service {} not installed, no service check", service.name);
                continue;
            }
            stages.push(StageWrapper::new(
                StageType::ServiceCheck,
                format!("Service Check {}", service.name),
                vec![TaskWrapper::new(
                    Some(&service.name),
                    None,
                    BTreeSet::new(),
                    vec![Task::ServiceCheck],
                )],
            ));
        }
        Ok(stages)
    }

    fn expand_cluster(grouping: &Grouping, ctx: &UpgradeContext) -> Result<Vec<StageWrapper>> {
        let mut stages = Vec::new();
        for stage in grouping.stages.iter().filter(|s| s.applies_to(ctx.direction())) {
            if let Some(wrapper) = Self::expand_cluster_stage(stage, ctx)? {
                stages.push(wrapper);
            }
        }
        Ok(stages)
    }

    fn expand_cluster_stage(
        stage: &ClusterStage,
        ctx: &UpgradeContext,
    ) -> Result<Option<StageWrapper>> {
        let service = stage.service.as_deref();
        let component = stage.component.as_deref();

        if let Some(svc) = service
            && !ctx.resolver().has_service(svc)?
        {
            debug!("Stage '{}' targets missing service {svc}, skipping", stage.title);
            return Ok(None);
        }

        let stage_type = match &stage.task {
            Task::Manual(_) | Task::Configure(_) => {
                return Ok(Some(StageWrapper::new(
                    StageType::ServerSideAction,
                    &stage.title,
                    vec![TaskWrapper::new(
                        service,
                        component,
                        BTreeSet::new(),
                        vec![stage.task.clone()],
                    )],
                )));
            }
            Task::ServiceCheck => {
                let Some(svc) = service else {
                    warn!("Service check stage '{}' names no service, skipping", stage.title);
                    return Ok(None);
                };
                return Ok(Some(StageWrapper::new(
                    StageType::ServiceCheck,
                    &stage.title,
                    vec![TaskWrapper::new(
                        Some(svc),
                        None,
                        BTreeSet::new(),
                        vec![Task::ServiceCheck],
                    )],
                )));
            }
            Task::Restart => StageType::Restart,
            Task::Execute(_) => StageType::RuTasks,
        };

        let hosts = stage_hosts(ctx, service, component)?;
        if hosts.is_empty() {
            debug!("Stage '{}' resolved to no hosts, skipping", stage.title);
            return Ok(None);
        }
        if stage_type == StageType::Restart && component.is_none() {
            warn!("Restart stage '{}' names no component, skipping", stage.title);
            return Ok(None);
        }

        Ok(Some(StageWrapper::new(
            stage_type,
            &stage.title,
            vec![TaskWrapper::new(
                service,
                component,
                hosts,
                vec![stage.task.clone()],
            )],
        )))
    }
}

impl SequenceExpander for PackExpander {
    fn create_sequence(
        &self,
        pack: &UpgradePack,
        ctx: &UpgradeContext,
    ) -> Result<Vec<UpgradeGroupHolder>> {
        let mut groups = Vec::new();
        for grouping in pack.groups_for(ctx.direction()) {
            let mut holder = UpgradeGroupHolder::from_grouping(grouping);
            holder.items = match grouping.kind {
                GroupingKind::Restart => Self::expand_restart(pack, grouping, ctx)?,
                GroupingKind::ServiceCheck => Self::expand_service_checks(grouping, ctx)?,
                GroupingKind::Cluster => Self::expand_cluster(grouping, ctx)?,
            };

            if holder.items.is_empty() {
                debug!("Group {} has nothing to do, dropping", grouping.name);
                continue;
            }
            groups.push(holder);
        }
        Ok(groups)
    }
}

/// Pre/post component tasks: script functions share one RU_TASKS stage, server-side
/// tasks share one SERVER_SIDE_ACTION stage.
fn wrap_component_tasks(
    tasks: &[Task],
    service: &str,
    component: &str,
    hosts: &BTreeSet<String>,
    verb: &str,
) -> Vec<StageWrapper> {
    let mut execute = Vec::new();
    let mut server_side = Vec::new();
    for task in tasks {
        match task {
            Task::Execute(_) => execute.push(task.clone()),
            Task::Manual(_) | Task::Configure(_) => server_side.push(task.clone()),
            Task::Restart | Task::ServiceCheck => {
                warn!("Ignoring {} task around {component}", task.kind());
            }
        }
    }

    let mut stages = Vec::new();
    if !execute.is_empty() {
        let text = execute
            .first()
            .and_then(Task::summary)
            .map_or_else(|| format!("{verb} {component}"), String::from);
        stages.push(StageWrapper::new(
            StageType::RuTasks,
            text,
            vec![TaskWrapper::new(
                Some(service),
                Some(component),
                hosts.clone(),
                execute,
            )],
        ));
    }
    if !server_side.is_empty() {
        stages.push(StageWrapper::new(
            StageType::ServerSideAction,
            format!("{verb} {component}"),
            vec![TaskWrapper::new(
                Some(service),
                Some(component),
                BTreeSet::new(),
                server_side,
            )],
        ));
    }
    stages
}

/// Hosts an explicit cluster stage runs on: the component's, every component of the
/// service, or the whole cluster.
fn stage_hosts(
    ctx: &UpgradeContext,
    service: Option<&str>,
    component: Option<&str>,
) -> Result<BTreeSet<String>> {
    let resolver = ctx.resolver();
    match (service, component) {
        (Some(svc), Some(comp)) => resolver.hosts_for(svc, comp),
        (Some(svc), None) => {
            let mut hosts = BTreeSet::new();
            for comp in resolver.store().components(resolver.cluster(), svc)? {
                hosts.extend(resolver.hosts_for(svc, &comp)?);
            }
            Ok(hosts)
        }
        (None, _) => resolver.store().hosts(resolver.cluster()),
    }
}
