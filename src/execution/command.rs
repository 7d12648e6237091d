//! Execution command and the action context it is built from.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::cluster::OperationLevel;
use crate::model::{ConfigTags, ConfigurationMap};

/// Well-known command and role parameter names.
pub mod params {
    pub const VERSION: &str = "version";
    pub const CLUSTER_NAME: &str = "clusterName";
    pub const UPGRADE_DIRECTION: &str = "upgrade_direction";
    pub const ORIGINAL_STACK: &str = "original_stack";
    pub const TARGET_STACK: &str = "target_stack";
    pub const DOWNGRADE_FROM_VERSION: &str = "downgrade_from_version";
    pub const RESTART_TYPE: &str = "restart_type";
    pub const ROLLING_UPGRADE: &str = "rolling_upgrade";
    pub const TASKS: &str = "tasks";
    pub const STRUCTURED_OUT: &str = "structured_out";
    pub const COMMAND: &str = "command";
    pub const CUSTOM_COMMAND: &str = "custom_command";
    pub const COMMAND_TIMEOUT: &str = "command_timeout";
    pub const SCRIPT: &str = "script";
    pub const SCRIPT_TYPE: &str = "script_type";
    pub const SCRIPT_TYPE_PYTHON: &str = "PYTHON";
    pub const COMPONENT_CATEGORY: &str = "component_category";
    pub const SERVICE_PACKAGE_FOLDER: &str = "service_package_folder";
    pub const HOOKS_FOLDER: &str = "hooks_folder";
    pub const STACK_NAME: &str = "stack_name";
    pub const STACK_VERSION: &str = "stack_version";
    /// Whitespace-separated config types (or `*`) to refresh before running.
    pub const REFRESH_CONFIG_TAGS_BEFORE_EXECUTION: &str = "forceRefreshConfigTagsBeforeExecution";
}

/// How many of the candidate hosts receive the command when none are named.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetHostType {
    #[default]
    All,
    Any,
    Majority,
    /// Only valid with an explicit host list.
    Specific,
}

impl std::fmt::Display for TargetHostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::Any => write!(f, "ANY"),
            Self::Majority => write!(f, "MAJORITY"),
            Self::Specific => write!(f, "SPECIFIC"),
        }
    }
}

/// Scope of an action: a service, a component of it, and optionally explicit hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestResourceFilter {
    pub service: Option<String>,
    pub component: Option<String>,
    pub hosts: Vec<String>,
}

impl RequestResourceFilter {
    pub fn new(service: Option<&str>, component: Option<&str>, hosts: Vec<String>) -> Self {
        Self {
            service: service.filter(|s| !s.is_empty()).map(String::from),
            component: component.filter(|c| !c.is_empty()).map(String::from),
            hosts,
        }
    }
}

/// Verb class of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleCommand {
    Execute,
    ActionExecute,
    CustomCommand,
    ServiceCheck,
}

impl std::fmt::Display for RoleCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execute => write!(f, "EXECUTE"),
            Self::ActionExecute => write!(f, "ACTIONEXECUTE"),
            Self::CustomCommand => write!(f, "CUSTOM_COMMAND"),
            Self::ServiceCheck => write!(f, "SERVICE_CHECK"),
        }
    }
}

/// Everything a stage builder hands to the materializer.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub cluster_name: String,
    pub action_name: String,
    pub resource_filters: Vec<RequestResourceFilter>,
    pub parameters: BTreeMap<String, String>,
    pub target_type: TargetHostType,
    pub operation_level: OperationLevel,
    pub retry_allowed: bool,
    pub auto_skip_failures: bool,
    /// Seconds; `None` falls back to the default agent task timeout.
    pub timeout_secs: Option<u32>,
}

impl ActionContext {
    pub fn new(
        cluster_name: impl Into<String>,
        action_name: impl Into<String>,
        resource_filters: Vec<RequestResourceFilter>,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            action_name: action_name.into(),
            resource_filters,
            parameters,
            target_type: TargetHostType::All,
            operation_level: OperationLevel::Cluster,
            retry_allowed: false,
            auto_skip_failures: false,
            timeout_secs: None,
        }
    }
}

/// One command bound to one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCommand {
    pub host: String,
    pub role: String,
    pub role_command: RoleCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    pub command_params: BTreeMap<String, String>,
    pub role_params: BTreeMap<String, String>,
    /// Always empty; the agent resolves configuration from the tags.
    pub configurations: ConfigurationMap,
    pub configuration_tags: ConfigTags,
    pub force_refresh_config_tags: BTreeSet<String>,
    pub cluster_host_info: BTreeMap<String, Vec<String>>,
    pub retry_allowed: bool,
    pub auto_skip_failures: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_detail: Option<String>,
}
