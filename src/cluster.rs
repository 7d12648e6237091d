//! Cluster state as seen by the orchestrator.
//!
//! The [`ClusterStore`] trait is the seam to the entity store holding hosts,
//! services, components, maintenance state and configuration history.

pub mod memory;
pub mod resolver;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::config::PropertyAttributes;
use crate::model::{ClusterId, ConfigTags, ConfigurationMap, Properties, StackId};

pub use memory::{ClusterSpec, MemoryClusterStore};
pub use resolver::HostResolver;

/// Scope at which maintenance state is evaluated for an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OperationLevel {
    /// Only host maintenance blocks the operation.
    #[default]
    Cluster,
    /// Host or service maintenance blocks the operation.
    Service,
    /// Host, service or host-component maintenance blocks the operation.
    HostComponent,
}

/// One immutable version of a configuration type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigVersion {
    pub tag: String,
    pub version: u64,
    pub stack: StackId,
    pub properties: Properties,
    pub attributes: PropertyAttributes,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// Read/write access to cluster entities.
pub trait ClusterStore: Send + Sync {
    fn cluster_id(&self, name: &str) -> Result<ClusterId>;
    fn cluster_name(&self, cluster: ClusterId) -> Result<String>;

    /// Stack the cluster currently runs.
    fn current_stack(&self, cluster: ClusterId) -> Result<StackId>;
    /// Stack the cluster is moving toward.
    fn desired_stack(&self, cluster: ClusterId) -> Result<StackId>;
    fn set_desired_stack(&self, cluster: ClusterId, stack: &StackId) -> Result<()>;
    /// Repository version the cluster currently runs.
    fn current_version(&self, cluster: ClusterId) -> Result<String>;

    fn hosts(&self, cluster: ClusterId) -> Result<BTreeSet<String>>;
    fn services(&self, cluster: ClusterId) -> Result<BTreeSet<String>>;
    fn components(&self, cluster: ClusterId, service: &str) -> Result<BTreeSet<String>>;
    fn component_hosts(
        &self,
        cluster: ClusterId,
        service: &str,
        component: &str,
    ) -> Result<BTreeSet<String>>;
    /// Version reported by a host component, if known.
    fn host_component_version(
        &self,
        cluster: ClusterId,
        service: &str,
        component: &str,
        host: &str,
    ) -> Result<Option<String>>;

    /// Effective desired configuration, resolved through the desired tags.
    fn desired_configs(&self, cluster: ClusterId) -> Result<ConfigurationMap>;
    /// Desired tags plus any override layers that apply to `host`.
    fn config_tags_with_overrides(&self, cluster: ClusterId, host: &str) -> Result<ConfigTags>;
    /// Create a new version of every type in `configs` and make it desired.
    fn create_config_types(
        &self,
        cluster: ClusterId,
        configs: &ConfigurationMap,
        note: &str,
    ) -> Result<()>;
    /// Make the newest version of each type created under `stack` desired again.
    fn apply_latest_configurations(&self, cluster: ClusterId, stack: &StackId) -> Result<()>;
    fn config_versions(&self, cluster: ClusterId, config_type: &str) -> Result<Vec<ConfigVersion>>;

    fn is_operation_allowed(
        &self,
        cluster: ClusterId,
        level: OperationLevel,
        service: Option<&str>,
        component: Option<&str>,
        host: &str,
    ) -> Result<bool>;
    /// Pick one host out of `candidates`, preferring healthy ones.
    fn healthy_host(&self, cluster: ClusterId, candidates: &BTreeSet<String>)
    -> Result<Option<String>>;
    /// Topology summary attached to commands (`all_hosts`, `<component>_hosts`).
    fn cluster_host_info(&self, cluster: ClusterId) -> Result<BTreeMap<String, Vec<String>>>;
}
