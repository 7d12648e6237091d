//! Per-cluster resolution of the hosts a component upgrade must touch.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use super::{ClusterStore, OperationLevel};
use crate::model::ClusterId;

/// Answers "which hosts run service/component X" for one cluster.
///
/// Hosts whose component is in maintenance are left out, and so are hosts
/// already reporting the target version when one is set.
#[derive(Clone)]
pub struct HostResolver {
    store: Arc<dyn ClusterStore>,
    cluster: ClusterId,
    target_version: Option<String>,
}

impl HostResolver {
    pub fn new(store: Arc<dyn ClusterStore>, cluster: ClusterId) -> Self {
        Self {
            store,
            cluster,
            target_version: None,
        }
    }

    /// Skip host components already at `version`.
    #[must_use]
    pub fn with_target_version(mut self, version: impl Into<String>) -> Self {
        self.target_version = Some(version.into());
        self
    }

    pub const fn cluster(&self) -> ClusterId {
        self.cluster
    }

    pub fn store(&self) -> &Arc<dyn ClusterStore> {
        &self.store
    }

    pub fn has_service(&self, service: &str) -> Result<bool> {
        Ok(self.store.services(self.cluster)?.contains(service))
    }

    /// Hosts that need `component` acted on; empty when not installed.
    pub fn hosts_for(&self, service: &str, component: &str) -> Result<BTreeSet<String>> {
        if !self.has_service(service)?
            || !self
                .store
                .components(self.cluster, service)?
                .contains(component)
        {
            return Ok(BTreeSet::new());
        }

        let mut hosts = BTreeSet::new();
        for host in self.store.component_hosts(self.cluster, service, component)? {
            if !self.store.is_operation_allowed(
                self.cluster,
                OperationLevel::HostComponent,
                Some(service),
                Some(component),
                &host,
            )? {
                debug!("Skipping {component} on {host}: maintenance mode");
                continue;
            }
            if let Some(target) = &self.target_version
                && self
                    .store
                    .host_component_version(self.cluster, service, component, &host)?
                    .as_deref()
                    == Some(target.as_str())
            {
                debug!("Skipping {component} on {host}: already at {target}");
                continue;
            }
            hosts.insert(host);
        }
        Ok(hosts)
    }
}

impl std::fmt::Debug for HostResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostResolver")
            .field("cluster", &self.cluster)
            .field("target_version", &self.target_version)
            .finish_non_exhaustive()
    }
}
