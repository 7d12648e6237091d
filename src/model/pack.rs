//! Upgrade pack definition: ordered groupings of typed tasks.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::config::ConfigurationMap;
use super::stack::{Direction, StackId};

/// Command parameter naming the configuration type a configure task writes.
pub const PARAMETER_CONFIG_TYPE: &str = "configure-task-config-type";

/// Command parameter carrying the JSON list of key/value pairs to set.
pub const PARAMETER_KEY_VALUE_PAIRS: &str = "configure-task-key-value-pairs";

/// Declarative description of how to move a cluster onto a target stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UpgradePack {
    pub name: String,
    /// Version pattern this pack applies to (e.g. `2.2.*.*`).
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_stack: Option<StackId>,
    /// Default for automatically skipping slave/client component failures.
    #[serde(default)]
    pub skip_failures: bool,
    /// Default for automatically skipping service check failures.
    #[serde(default)]
    pub skip_service_check_failures: bool,
    #[serde(default)]
    pub groups: Vec<Grouping>,
    /// Per-component tasks run around the component restart.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processing: Vec<ProcessingComponent>,
}

impl UpgradePack {
    /// Groupings in execution order for the given direction.
    pub fn groups_for(&self, direction: Direction) -> Vec<&Grouping> {
        let mut groups: Vec<&Grouping> = self.groups.iter().collect();
        if direction.is_downgrade() {
            groups.reverse();
        }
        groups
    }

    /// Every service any grouping touches in the given direction.
    pub fn services_for(&self, direction: Direction) -> BTreeSet<String> {
        let mut services = BTreeSet::new();
        for group in self.groups_for(direction) {
            services.extend(group.services.iter().map(|s| s.name.clone()));
            services.extend(
                group
                    .stages
                    .iter()
                    .filter(|s| s.applies_to(direction))
                    .filter_map(|s| s.service.clone()),
            );
        }
        services
    }

    /// Pre/post tasks declared for a component, if any.
    pub fn processing_for(&self, service: &str, component: &str) -> Option<&ProcessingComponent> {
        self.processing
            .iter()
            .find(|p| p.service == service && p.component == component)
    }
}

/// Kind of grouping, deciding how its contents expand into stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingKind {
    /// Restart each listed component on its hosts.
    #[default]
    Restart,
    /// Run the service check of each listed service.
    ServiceCheck,
    /// Explicit stages, independent of service layout.
    Cluster,
}

/// One ordered phase of an upgrade pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Grouping {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub kind: GroupingKind,
    #[serde(default)]
    pub skippable: bool,
    #[serde(default = "default_true")]
    pub allow_retry: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<OrderService>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<ClusterStage>,
}

const fn default_true() -> bool {
    true
}

/// A service and its components in restart order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderService {
    pub name: String,
    #[serde(default)]
    pub components: Vec<String>,
}

/// Explicit stage inside a cluster grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterStage {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Restrict the stage to one direction; both when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    pub task: Task,
}

impl ClusterStage {
    pub fn applies_to(&self, direction: Direction) -> bool {
        self.direction.is_none_or(|d| d == direction)
    }
}

/// Tasks bracketing the restart of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessingComponent {
    pub service: String,
    pub component: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_upgrade: Vec<Task>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_downgrade: Vec<Task>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_upgrade: Vec<Task>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_downgrade: Vec<Task>,
}

impl ProcessingComponent {
    pub fn pre_tasks(&self, direction: Direction) -> &[Task] {
        match direction {
            Direction::Upgrade => &self.pre_upgrade,
            Direction::Downgrade => &self.pre_downgrade,
        }
    }

    pub fn post_tasks(&self, direction: Direction) -> &[Task] {
        match direction {
            Direction::Upgrade => &self.post_upgrade,
            Direction::Downgrade => &self.post_downgrade,
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Discriminant of [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Restart,
    ServiceCheck,
    Execute,
    Manual,
    Configure,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restart => write!(f, "RESTART"),
            Self::ServiceCheck => write!(f, "SERVICE_CHECK"),
            Self::Execute => write!(f, "EXECUTE"),
            Self::Manual => write!(f, "MANUAL"),
            Self::Configure => write!(f, "CONFIGURE"),
        }
    }
}

/// An abstract unit of upgrade work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    Restart,
    ServiceCheck,
    Execute(ExecuteTask),
    Manual(ManualTask),
    Configure(ConfigureTask),
}

impl Task {
    pub const fn kind(&self) -> TaskKind {
        match self {
            Self::Restart => TaskKind::Restart,
            Self::ServiceCheck => TaskKind::ServiceCheck,
            Self::Execute(_) => TaskKind::Execute,
            Self::Manual(_) => TaskKind::Manual,
            Self::Configure(_) => TaskKind::Configure,
        }
    }

    /// Tasks executed inside the orchestrator rather than on agent hosts.
    pub const fn is_server_side(&self) -> bool {
        matches!(self, Self::Manual(_) | Self::Configure(_))
    }

    pub fn summary(&self) -> Option<&str> {
        match self {
            Self::Execute(t) => t.summary.as_deref(),
            Self::Manual(t) => t.summary.as_deref(),
            Self::Configure(t) => t.summary.as_deref(),
            Self::Restart | Self::ServiceCheck => None,
        }
    }
}

/// Run a function of a service script on the target hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecuteTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    pub function: String,
}

/// Pause for an operator action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ManualTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub message: String,
    /// Opaque JSON handed back to the operator with the hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_out: Option<String>,
}

/// Set configuration properties, optionally only when a condition holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfigureTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set: Vec<ConfigKeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConfigCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigKeyValue {
    pub key: String,
    pub value: String,
}

/// Desired-configuration property that must equal `value` for the task to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfigCondition {
    pub config_type: String,
    pub key: String,
    pub value: String,
}

impl ConfigureTask {
    /// Command parameters describing the change; empty when the task does not apply.
    pub fn configuration_changes(&self, desired: &ConfigurationMap) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();

        if let Some(cond) = &self.condition
            && desired.property(&cond.config_type, &cond.key) != Some(cond.value.as_str())
        {
            return params;
        }

        let Some(config_type) = &self.config_type else {
            return params;
        };

        params.insert(PARAMETER_CONFIG_TYPE.to_string(), config_type.clone());
        if !self.set.is_empty() {
            let pairs = serde_json::to_string(&self.set).unwrap_or_else(|_| "[]".to_string());
            params.insert(PARAMETER_KEY_VALUE_PAIRS.to_string(), pairs);
        }
        params
    }
}
