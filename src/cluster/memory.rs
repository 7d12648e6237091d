//! In-memory cluster store, populated from the inventory.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::{ClusterStore, ConfigVersion, OperationLevel};
use crate::error::UpgradeError;
use crate::model::config::TAG_KEY;
use crate::model::{ClusterId, ConfigTags, ConfigurationMap, Properties, StackId};

// ============================================================================
// Inventory shape
// ============================================================================

/// Declarative description of one cluster.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterSpec {
    pub name: String,
    pub current_stack: StackId,
    /// Defaults to the current stack.
    #[serde(default)]
    pub desired_stack: Option<StackId>,
    pub current_version: String,
    #[serde(default)]
    pub hosts: BTreeMap<String, HostSpec>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
    #[serde(default)]
    pub desired_configs: BTreeMap<String, Properties>,
    #[serde(default)]
    pub config_groups: Vec<ConfigGroupSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostSpec {
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

impl Default for HostSpec {
    fn default() -> Self {
        Self {
            maintenance: false,
            healthy: true,
        }
    }
}

const fn default_healthy() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSpec {
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ComponentSpec {
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Hosts where this component alone is in maintenance.
    #[serde(default)]
    pub maintenance_hosts: BTreeSet<String>,
    /// Version every host of this component reports.
    #[serde(default)]
    pub version: Option<String>,
}

/// Override layer applying alternate tags to a subset of hosts.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigGroupSpec {
    pub id: u64,
    pub name: String,
    pub hosts: BTreeSet<String>,
    pub tags: BTreeMap<String, String>,
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone)]
struct HostComponentState {
    maintenance: bool,
    version: Option<String>,
}

#[derive(Debug)]
struct ServiceState {
    maintenance: bool,
    components: BTreeMap<String, BTreeMap<String, HostComponentState>>,
}

#[derive(Debug)]
struct ClusterState {
    name: String,
    current_stack: StackId,
    desired_stack: StackId,
    current_version: String,
    hosts: BTreeMap<String, HostSpec>,
    services: BTreeMap<String, ServiceState>,
    configs: BTreeMap<String, Vec<ConfigVersion>>,
    desired_tags: BTreeMap<String, String>,
    config_groups: Vec<ConfigGroupSpec>,
    next_config_version: u64,
}

impl ClusterState {
    fn service(&self, service: &str) -> Result<&ServiceState> {
        self.services.get(service).ok_or_else(|| {
            UpgradeError::NotFound(format!(
                "Service {service} not found in cluster {}",
                self.name
            ))
            .into()
        })
    }

    fn component(
        &self,
        service: &str,
        component: &str,
    ) -> Result<&BTreeMap<String, HostComponentState>> {
        self.service(service)?
            .components
            .get(component)
            .ok_or_else(|| {
                UpgradeError::NotFound(format!(
                    "Component {component} of service {service} not found in cluster {}",
                    self.name
                ))
                .into()
            })
    }

    fn add_config_version(&mut self, config_type: &str, properties: Properties, note: &str) {
        self.add_config_version_with(config_type, properties, BTreeMap::new(), note);
    }

    fn add_config_version_with(
        &mut self,
        config_type: &str,
        properties: Properties,
        attributes: crate::model::config::PropertyAttributes,
        note: &str,
    ) {
        let version = self.next_config_version;
        self.next_config_version += 1;
        let tag = format!("version{version}");
        self.configs
            .entry(config_type.to_string())
            .or_default()
            .push(ConfigVersion {
                tag: tag.clone(),
                version,
                stack: self.desired_stack.clone(),
                properties,
                attributes,
                note: note.to_string(),
                created_at: Utc::now(),
            });
        self.desired_tags.insert(config_type.to_string(), tag);
    }
}

/// Cluster store backed by process memory.
#[derive(Debug)]
pub struct MemoryClusterStore {
    clusters: RwLock<BTreeMap<ClusterId, ClusterState>>,
    next_id: AtomicU64,
}

impl Default for MemoryClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClusterStore {
    pub fn new() -> Self {
        Self {
            clusters: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a cluster; its initial configuration becomes version 1 of each type.
    pub fn add_cluster(&self, spec: ClusterSpec) -> Result<ClusterId> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|_| UpgradeError::poisoned("cluster store"))?;

        if clusters.values().any(|c| c.name == spec.name) {
            return Err(
                UpgradeError::Validation(format!("Cluster {} already exists", spec.name)).into(),
            );
        }

        let mut hosts = spec.hosts;
        let mut services = BTreeMap::new();
        for (service_name, service) in spec.services {
            let mut components = BTreeMap::new();
            for (component_name, component) in service.components {
                let mut host_components = BTreeMap::new();
                for host in component.hosts {
                    hosts.entry(host.clone()).or_default();
                    host_components.insert(
                        host.clone(),
                        HostComponentState {
                            maintenance: component.maintenance_hosts.contains(&host),
                            version: component.version.clone(),
                        },
                    );
                }
                components.insert(component_name, host_components);
            }
            services.insert(
                service_name,
                ServiceState {
                    maintenance: service.maintenance,
                    components,
                },
            );
        }

        let id = ClusterId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut state = ClusterState {
            name: spec.name,
            desired_stack: spec
                .desired_stack
                .unwrap_or_else(|| spec.current_stack.clone()),
            current_stack: spec.current_stack,
            current_version: spec.current_version,
            hosts,
            services,
            configs: BTreeMap::new(),
            desired_tags: BTreeMap::new(),
            config_groups: spec.config_groups,
            next_config_version: 1,
        };
        for (config_type, properties) in spec.desired_configs {
            state.add_config_version(&config_type, properties, "Initial configuration");
        }

        debug!("Registered cluster {} with id {}", state.name, id);
        clusters.insert(id, state);
        Ok(id)
    }

    fn read<T>(&self, cluster: ClusterId, f: impl FnOnce(&ClusterState) -> Result<T>) -> Result<T> {
        let clusters = self
            .clusters
            .read()
            .map_err(|_| UpgradeError::poisoned("cluster store"))?;
        let state = clusters
            .get(&cluster)
            .ok_or_else(|| UpgradeError::NotFound(format!("Cluster {cluster} not found")))?;
        f(state)
    }

    fn write<T>(
        &self,
        cluster: ClusterId,
        f: impl FnOnce(&mut ClusterState) -> Result<T>,
    ) -> Result<T> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|_| UpgradeError::poisoned("cluster store"))?;
        let state = clusters
            .get_mut(&cluster)
            .ok_or_else(|| UpgradeError::NotFound(format!("Cluster {cluster} not found")))?;
        f(state)
    }

    #[cfg(test)]
    pub fn set_host_maintenance(&self, cluster: ClusterId, host: &str, on: bool) -> Result<()> {
        self.write(cluster, |state| {
            if let Some(h) = state.hosts.get_mut(host) {
                h.maintenance = on;
            }
            Ok(())
        })
    }

    #[cfg(test)]
    pub fn set_current_stack(&self, cluster: ClusterId, stack: &StackId) -> Result<()> {
        self.write(cluster, |state| {
            state.current_stack = stack.clone();
            Ok(())
        })
    }
}

impl ClusterStore for MemoryClusterStore {
    fn cluster_id(&self, name: &str) -> Result<ClusterId> {
        let clusters = self
            .clusters
            .read()
            .map_err(|_| UpgradeError::poisoned("cluster store"))?;
        clusters
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| *id)
            .ok_or_else(|| UpgradeError::NotFound(format!("Cluster {name} not found")).into())
    }

    fn cluster_name(&self, cluster: ClusterId) -> Result<String> {
        self.read(cluster, |s| Ok(s.name.clone()))
    }

    fn current_stack(&self, cluster: ClusterId) -> Result<StackId> {
        self.read(cluster, |s| Ok(s.current_stack.clone()))
    }

    fn desired_stack(&self, cluster: ClusterId) -> Result<StackId> {
        self.read(cluster, |s| Ok(s.desired_stack.clone()))
    }

    fn set_desired_stack(&self, cluster: ClusterId, stack: &StackId) -> Result<()> {
        self.write(cluster, |s| {
            debug!("Cluster {} desired stack {} -> {}", s.name, s.desired_stack, stack);
            s.desired_stack = stack.clone();
            Ok(())
        })
    }

    fn current_version(&self, cluster: ClusterId) -> Result<String> {
        self.read(cluster, |s| Ok(s.current_version.clone()))
    }

    fn hosts(&self, cluster: ClusterId) -> Result<BTreeSet<String>> {
        self.read(cluster, |s| Ok(s.hosts.keys().cloned().collect()))
    }

    fn services(&self, cluster: ClusterId) -> Result<BTreeSet<String>> {
        self.read(cluster, |s| Ok(s.services.keys().cloned().collect()))
    }

    fn components(&self, cluster: ClusterId, service: &str) -> Result<BTreeSet<String>> {
        self.read(cluster, |s| {
            Ok(s.service(service)?.components.keys().cloned().collect())
        })
    }

    fn component_hosts(
        &self,
        cluster: ClusterId,
        service: &str,
        component: &str,
    ) -> Result<BTreeSet<String>> {
        self.read(cluster, |s| {
            Ok(s.component(service, component)?.keys().cloned().collect())
        })
    }

    fn host_component_version(
        &self,
        cluster: ClusterId,
        service: &str,
        component: &str,
        host: &str,
    ) -> Result<Option<String>> {
        self.read(cluster, |s| {
            Ok(s.component(service, component)?
                .get(host)
                .and_then(|hc| hc.version.clone()))
        })
    }

    fn desired_configs(&self, cluster: ClusterId) -> Result<ConfigurationMap> {
        self.read(cluster, |s| {
            let mut map = ConfigurationMap::new();
            for (config_type, tag) in &s.desired_tags {
                let version = s
                    .configs
                    .get(config_type)
                    .and_then(|versions| versions.iter().find(|v| &v.tag == tag));
                if let Some(version) = version {
                    map.insert_type(config_type.clone(), version.properties.clone());
                    map.insert_attributes(config_type.clone(), version.attributes.clone());
                }
            }
            Ok(map)
        })
    }

    fn config_tags_with_overrides(&self, cluster: ClusterId, host: &str) -> Result<ConfigTags> {
        self.read(cluster, |s| {
            let mut tags = ConfigTags::new();
            for (config_type, tag) in &s.desired_tags {
                tags.entry(config_type.clone())
                    .or_default()
                    .insert(TAG_KEY.to_string(), tag.clone());
            }
            for group in s.config_groups.iter().filter(|g| g.hosts.contains(host)) {
                for (config_type, tag) in &group.tags {
                    tags.entry(config_type.clone())
                        .or_default()
                        .insert(group.id.to_string(), tag.clone());
                }
            }
            Ok(tags)
        })
    }

    fn create_config_types(
        &self,
        cluster: ClusterId,
        configs: &ConfigurationMap,
        note: &str,
    ) -> Result<()> {
        self.write(cluster, |s| {
            for (config_type, properties) in &configs.properties {
                let attributes = configs
                    .attributes
                    .get(config_type)
                    .cloned()
                    .unwrap_or_default();
                s.add_config_version_with(config_type, properties.clone(), attributes, note);
            }
            Ok(())
        })
    }

    fn apply_latest_configurations(&self, cluster: ClusterId, stack: &StackId) -> Result<()> {
        self.write(cluster, |s| {
            let mut desired = BTreeMap::new();
            for (config_type, versions) in &s.configs {
                if let Some(latest) = versions.iter().rev().find(|v| &v.stack == stack) {
                    desired.insert(config_type.clone(), latest.tag.clone());
                }
            }
            debug!(
                "Cluster {} reapplying {} configuration types of {}",
                s.name,
                desired.len(),
                stack
            );
            s.desired_tags = desired;
            Ok(())
        })
    }

    fn config_versions(&self, cluster: ClusterId, config_type: &str) -> Result<Vec<ConfigVersion>> {
        self.read(cluster, |s| {
            Ok(s.configs.get(config_type).cloned().unwrap_or_default())
        })
    }

    fn is_operation_allowed(
        &self,
        cluster: ClusterId,
        level: OperationLevel,
        service: Option<&str>,
        component: Option<&str>,
        host: &str,
    ) -> Result<bool> {
        self.read(cluster, |s| {
            if s.hosts.get(host).is_some_and(|h| h.maintenance) {
                return Ok(false);
            }
            if level == OperationLevel::Cluster {
                return Ok(true);
            }
            let Some(service_state) = service.and_then(|name| s.services.get(name)) else {
                return Ok(true);
            };
            if service_state.maintenance {
                return Ok(false);
            }
            if level == OperationLevel::HostComponent
                && let Some(component) = component
                && service_state
                    .components
                    .get(component)
                    .and_then(|hosts| hosts.get(host))
                    .is_some_and(|hc| hc.maintenance)
            {
                return Ok(false);
            }
            Ok(true)
        })
    }

    fn healthy_host(
        &self,
        cluster: ClusterId,
        candidates: &BTreeSet<String>,
    ) -> Result<Option<String>> {
        self.read(cluster, |s| {
            let healthy = candidates
                .iter()
                .find(|h| s.hosts.get(*h).is_some_and(|spec| spec.healthy));
            Ok(healthy.or_else(|| candidates.first()).cloned())
        })
    }

    fn cluster_host_info(&self, cluster: ClusterId) -> Result<BTreeMap<String, Vec<String>>> {
        self.read(cluster, |s| {
            let mut info = BTreeMap::new();
            info.insert(
                "all_hosts".to_string(),
                s.hosts.keys().cloned().collect::<Vec<_>>(),
            );
            for service in s.services.values() {
                for (component, hosts) in &service.components {
                    info.insert(
                        format!("{}_hosts", component.to_lowercase()),
                        hosts.keys().cloned().collect(),
                    );
                }
            }
            Ok(info)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ClusterSpec {
        serde_yaml::from_str(
            r"
name: c1
current_stack: HDP-2.1
current_version: 2.1.1.0
hosts:
  h1: {}
  h2: { healthy: false }
services:
  HDFS:
    components:
      NAMENODE: { hosts: [h1] }
      DATANODE: { hosts: [h1, h2, h3], maintenance_hosts: [h3] }
desired_configs:
  hdfs-site:
    dfs.replication: '3'
config_groups:
  - id: 5
    name: big-disks
    hosts: [h2]
    tags: { hdfs-site: version77 }
",
        )
        .unwrap()
    }

    #[test]
    fn test_add_cluster_and_lookup() {
        let store = MemoryClusterStore::new();
        let id = store.add_cluster(spec()).unwrap();
        assert_eq!(store.cluster_id("c1").unwrap(), id);
        assert_eq!(store.cluster_name(id).unwrap(), "c1");
        assert_eq!(store.desired_stack(id).unwrap(), StackId::new("HDP", "2.1"));
        // h3 is only referenced by a component
        assert_eq!(store.hosts(id).unwrap().len(), 3);
        assert!(store.add_cluster(spec()).is_err());
    }

    #[test]
    fn test_missing_cluster_is_not_found() {
        let store = MemoryClusterStore::new();
        let err = store.cluster_id("nope").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::NotFound(_))
        ));
    }

    #[test]
    fn test_config_tags_with_overrides() {
        let store = MemoryClusterStore::new();
        let id = store.add_cluster(spec()).unwrap();

        let tags = store.config_tags_with_overrides(id, "h1").unwrap();
        assert_eq!(tags["hdfs-site"].len(), 1);
        assert_eq!(tags["hdfs-site"][TAG_KEY], "version1");

        let tags = store.config_tags_with_overrides(id, "h2").unwrap();
        assert_eq!(tags["hdfs-site"]["5"], "version77");
    }

    #[test]
    fn test_create_and_reapply_configurations() {
        let store = MemoryClusterStore::new();
        let id = store.add_cluster(spec()).unwrap();
        let old_stack = StackId::new("HDP", "2.1");
        let new_stack = StackId::new("HDP", "2.2");

        store.set_desired_stack(id, &new_stack).unwrap();
        let mut configs = ConfigurationMap::new();
        configs.set_property("hdfs-site", "dfs.replication", "2");
        store
            .create_config_types(id, &configs, "Configuration created for Upgrade")
            .unwrap();
        assert_eq!(
            store
                .desired_configs(id)
                .unwrap()
                .property("hdfs-site", "dfs.replication"),
            Some("2")
        );

        store.apply_latest_configurations(id, &old_stack).unwrap();
        assert_eq!(
            store
                .desired_configs(id)
                .unwrap()
                .property("hdfs-site", "dfs.replication"),
            Some("3")
        );
        let versions = store.config_versions(id, "hdfs-site").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].stack, new_stack);
    }

    #[test]
    fn test_is_operation_allowed() {
        let store = MemoryClusterStore::new();
        let id = store.add_cluster(spec()).unwrap();

        assert!(
            store
                .is_operation_allowed(id, OperationLevel::Cluster, Some("HDFS"), Some("DATANODE"), "h3")
                .unwrap()
        );
        assert!(
            !store
                .is_operation_allowed(
                    id,
                    OperationLevel::HostComponent,
                    Some("HDFS"),
                    Some("DATANODE"),
                    "h3"
                )
                .unwrap()
        );

        store.set_host_maintenance(id, "h1", true).unwrap();
        assert!(
            !store
                .is_operation_allowed(id, OperationLevel::Cluster, None, None, "h1")
                .unwrap()
        );
    }

    #[test]
    fn test_healthy_host_prefers_healthy() {
        let store = MemoryClusterStore::new();
        let id = store.add_cluster(spec()).unwrap();
        let only_unhealthy: BTreeSet<String> = ["h2".to_string()].into();
        assert_eq!(
            store.healthy_host(id, &only_unhealthy).unwrap(),
            Some("h2".to_string())
        );
        let mixed: BTreeSet<String> = ["h1".to_string(), "h2".to_string()].into();
        assert_eq!(store.healthy_host(id, &mixed).unwrap(), Some("h1".to_string()));
        assert_eq!(store.healthy_host(id, &BTreeSet::new()).unwrap(), None);
    }

    #[test]
    fn test_cluster_host_info() {
        let store = MemoryClusterStore::new();
        let id = store.add_cluster(spec()).unwrap();
        let info = store.cluster_host_info(id).unwrap();
        assert_eq!(info["all_hosts"].len(), 3);
        assert_eq!(info["namenode_hosts"], vec!["h1".to_string()]);
    }
}
