//! Compiles an upgrade pack into a persisted plan and a submitted execution request.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};

use super::context::UpgradeContext;
use super::sequence::{SequenceExpander, StageType, StageWrapper, TaskWrapper, UpgradeGroupHolder};
use super::stages::{StageFactory, StageInput};
use super::variables::PlaceholderResolver;
use crate::cluster::ClusterStore;
use crate::error::UpgradeError;
use crate::execution::{ExecutionRequest, ExecutionScheduler};
use crate::model::{
    ConfigurationMap, StageId, Task, UpgradeEntity, UpgradeGroupEntity, UpgradeItemEntity,
    UpgradePack,
};
use crate::persistence::UpgradeStore;
use crate::reconcile::ConfigReconciler;
use crate::stack::StackRepository;
use crate::telemetry::metrics::Metrics;

/// Timeouts applied to compiled stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerSettings {
    /// Default agent command timeout, seconds.
    pub agent_task_timeout_secs: u32,
    /// Timeout of in-process server actions, seconds.
    pub server_action_timeout_secs: u32,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            agent_task_timeout_secs: 900,
            server_action_timeout_secs: 1200,
        }
    }
}

/// Turns a pack and context into one `UpgradeEntity`.
pub struct PlanCompiler {
    store: Arc<dyn ClusterStore>,
    scheduler: Arc<dyn ExecutionScheduler>,
    upgrades: Arc<dyn UpgradeStore>,
    expander: Arc<dyn SequenceExpander>,
    reconciler: ConfigReconciler,
    stages: StageFactory,
    placeholders: PlaceholderResolver,
    metrics: Option<Arc<Metrics>>,
}

impl PlanCompiler {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        stacks: Arc<dyn StackRepository>,
        scheduler: Arc<dyn ExecutionScheduler>,
        upgrades: Arc<dyn UpgradeStore>,
        expander: Arc<dyn SequenceExpander>,
        settings: CompilerSettings,
    ) -> Result<Self> {
        Ok(Self {
            reconciler: ConfigReconciler::new(store.clone(), stacks.clone()),
            stages: StageFactory::new(
                store.clone(),
                stacks,
                settings.agent_task_timeout_secs,
                settings.server_action_timeout_secs,
            ),
            placeholders: PlaceholderResolver::new()?,
            store,
            scheduler,
            upgrades,
            expander,
            metrics: None,
        })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Compile, submit and persist the plan.
    ///
    /// Nothing is submitted or persisted when any stage fails to build.
    pub fn compile(&self, ctx: &UpgradeContext, pack: &UpgradePack) -> Result<UpgradeEntity> {
        let started = Instant::now();
        let cluster = ctx.cluster();
        let cluster_name = self.store.cluster_name(cluster)?;

        let groups = self.expander.create_sequence(pack, ctx)?;
        if groups.is_empty() {
            return Err(UpgradeError::PlanEmpty.into());
        }

        let mut request = ExecutionRequest::new(
            self.scheduler.next_request_id(),
            cluster,
            format!("{} to {}", ctx.direction().verb(), ctx.version()),
        );

        let outcome = self.reconciler.reconcile(
            &ctx.target_stack().name,
            cluster,
            ctx.version(),
            ctx.direction(),
            pack,
        )?;
        if let Some(metrics) = &self.metrics {
            metrics.record_reconcile(&cluster_name, outcome.label());
        }

        let desired = self.store.desired_configs(cluster)?;
        let mut group_entities = Vec::with_capacity(groups.len());
        for group in &groups {
            let items = self.compile_group(ctx, &cluster_name, group, &desired, &mut request)?;
            group_entities.push(UpgradeGroupEntity {
                name: group.name.clone(),
                title: group.title.clone(),
                items,
            });
        }

        let entity = UpgradeEntity {
            upgrade_id: 0,
            cluster_id: cluster,
            request_id: request.id,
            from_version: self.store.current_version(cluster)?,
            to_version: ctx.version().to_string(),
            direction: ctx.direction(),
            groups: group_entities,
            created_at: Utc::now(),
        };

        let stage_count = request.stages.len();
        self.scheduler.submit(request)?;
        let entity = self.upgrades.create(entity)?;

        if let Some(metrics) = &self.metrics {
            metrics.observe_compile(&cluster_name, ctx.direction(), started.elapsed().as_secs_f64());
        }
        info!(
            "Compiled {} plan {} for {} ({} -> {}): {} groups, {} stages",
            ctx.direction(),
            entity.request_id,
            cluster_name,
            entity.from_version,
            entity.to_version,
            entity.groups.len(),
            stage_count
        );
        Ok(entity)
    }

    fn compile_group(
        &self,
        ctx: &UpgradeContext,
        cluster_name: &str,
        group: &UpgradeGroupHolder,
        desired: &ConfigurationMap,
        request: &mut ExecutionRequest,
    ) -> Result<Vec<UpgradeItemEntity>> {
        let mut items = Vec::new();
        for wrapper in &group.items {
            if wrapper.stage_type == StageType::ServerSideAction {
                // Each server-side task gets a stage of its own.
                for task_wrapper in &wrapper.tasks {
                    for task in &task_wrapper.tasks {
                        let single = StageWrapper::new(
                            wrapper.stage_type,
                            &wrapper.text,
                            vec![TaskWrapper::new(
                                task_wrapper.service.as_deref(),
                                task_wrapper.component.as_deref(),
                                task_wrapper.hosts.clone(),
                                vec![task.clone()],
                            )],
                        );
                        items.push(self.compile_item(
                            ctx,
                            cluster_name,
                            group,
                            &single,
                            Some(task),
                            desired,
                            request,
                        )?);
                    }
                }
            } else {
                items.push(self.compile_item(
                    ctx,
                    cluster_name,
                    group,
                    wrapper,
                    None,
                    desired,
                    request,
                )?);
            }
        }
        debug!("Group {}: {} item(s)", group.name, items.len());
        Ok(items)
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_item(
        &self,
        ctx: &UpgradeContext,
        cluster_name: &str,
        group: &UpgradeGroupHolder,
        wrapper: &StageWrapper,
        task: Option<&Task>,
        desired: &ConfigurationMap,
        request: &mut ExecutionRequest,
    ) -> Result<UpgradeItemEntity> {
        let tasks_json = wrapper.tasks_json()?;
        let mut item = UpgradeItemEntity {
            stage_id: StageId(0),
            text: wrapper.text.clone(),
            tasks: self.placeholders.resolve(&tasks_json, desired),
            hosts: wrapper.hosts_json()?,
        };

        let input = StageInput {
            ctx,
            cluster_name,
            group,
            wrapper,
            task,
        };
        self.stages.make_stage(request, &input, &mut item)?;

        if let Some(metrics) = &self.metrics {
            metrics.record_stage(wrapper.stage_type);
        }
        Ok(item)
    }
}
