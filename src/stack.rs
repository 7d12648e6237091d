//! Stack metadata: repository versions, upgrade packs and service definitions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::UpgradeError;
use crate::model::config::PropertyAttributes;
use crate::model::{Properties, RepositoryVersion, StackId, UpgradePack};

/// Role a component plays in its service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComponentCategory {
    Master,
    #[default]
    Slave,
    Client,
}

impl std::fmt::Display for ComponentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "MASTER"),
            Self::Slave => write!(f, "SLAVE"),
            Self::Client => write!(f, "CLIENT"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    #[serde(default)]
    pub category: ComponentCategory,
}

/// A service as defined by one stack version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceInfo {
    #[serde(default)]
    pub package_folder: String,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentInfo>,
    /// Default properties per configuration type owned by this service.
    #[serde(default)]
    pub configurations: BTreeMap<String, Properties>,
    #[serde(default)]
    pub configuration_attributes: BTreeMap<String, PropertyAttributes>,
}

impl ServiceInfo {
    pub fn config_types(&self) -> BTreeSet<String> {
        self.configurations.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RepositoryVersionSpec {
    pub version: String,
    #[serde(default)]
    pub upgrade_package: String,
}

/// Everything known about one stack version.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StackDefinition {
    pub id: StackId,
    #[serde(default)]
    pub hooks_folder: String,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceInfo>,
    #[serde(default)]
    pub repository_versions: Vec<RepositoryVersionSpec>,
    #[serde(default)]
    pub upgrade_packs: Vec<UpgradePack>,
}

/// Read access to stack metadata.
pub trait StackRepository: Send + Sync {
    /// Repository version registered for a stack name, if any.
    fn repository_version(&self, stack_name: &str, version: &str)
    -> Result<Option<RepositoryVersion>>;
    /// Upgrade packs shipped with a stack, keyed by pack name.
    fn upgrade_packs(&self, stack: &StackId) -> Result<BTreeMap<String, UpgradePack>>;
    fn services(&self, stack: &StackId) -> Result<BTreeMap<String, ServiceInfo>>;
    fn hooks_folder(&self, stack: &StackId) -> Result<String>;

    fn service(&self, stack: &StackId, service: &str) -> Result<ServiceInfo> {
        self.services(stack)?.remove(service).ok_or_else(|| {
            UpgradeError::NotFound(format!("Service {service} is not defined in stack {stack}"))
                .into()
        })
    }

    fn component(
        &self,
        stack: &StackId,
        service: &str,
        component: &str,
    ) -> Result<Option<ComponentInfo>> {
        Ok(self
            .services(stack)?
            .get(service)
            .and_then(|s| s.components.get(component).cloned()))
    }
}

/// Stack repository backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStackRepository {
    stacks: RwLock<BTreeMap<StackId, StackDefinition>>,
}

impl MemoryStackRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stack(&self, definition: StackDefinition) -> Result<()> {
        let mut stacks = self
            .stacks
            .write()
            .map_err(|_| UpgradeError::poisoned("stack repository"))?;
        if stacks.contains_key(&definition.id) {
            return Err(
                UpgradeError::Validation(format!("Stack {} already defined", definition.id)).into(),
            );
        }
        stacks.insert(definition.id.clone(), definition);
        Ok(())
    }

    fn read<T>(&self, stack: &StackId, f: impl FnOnce(&StackDefinition) -> T) -> Result<T> {
        let stacks = self
            .stacks
            .read()
            .map_err(|_| UpgradeError::poisoned("stack repository"))?;
        let definition = stacks
            .get(stack)
            .ok_or_else(|| UpgradeError::NotFound(format!("Stack {stack} not found")))?;
        Ok(f(definition))
    }
}

impl StackRepository for MemoryStackRepository {
    fn repository_version(
        &self,
        stack_name: &str,
        version: &str,
    ) -> Result<Option<RepositoryVersion>> {
        let stacks = self
            .stacks
            .read()
            .map_err(|_| UpgradeError::poisoned("stack repository"))?;
        Ok(stacks
            .values()
            .filter(|s| s.id.name == stack_name)
            .find_map(|s| {
                s.repository_versions
                    .iter()
                    .find(|r| r.version == version)
                    .map(|r| RepositoryVersion {
                        stack: s.id.clone(),
                        version: r.version.clone(),
                        upgrade_package: r.upgrade_package.clone(),
                    })
            }))
    }

    fn upgrade_packs(&self, stack: &StackId) -> Result<BTreeMap<String, UpgradePack>> {
        self.read(stack, |s| {
            s.upgrade_packs
                .iter()
                .map(|p| (p.name.clone(), p.clone()))
                .collect()
        })
    }

    fn services(&self, stack: &StackId) -> Result<BTreeMap<String, ServiceInfo>> {
        self.read(stack, |s| s.services.clone())
    }

    fn hooks_folder(&self, stack: &StackId) -> Result<String> {
        self.read(stack, |s| s.hooks_folder.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> MemoryStackRepository {
        let repo = MemoryStackRepository::new();
        let definition: StackDefinition = serde_yaml::from_str(
            r"
id: HDP-2.2
hooks_folder: HDP/2.0.6/hooks
services:
  HDFS:
    package_folder: common-services/HDFS/2.1.0.2.0/package
    components:
      NAMENODE: { category: MASTER }
      DATANODE: {}
    configurations:
      hdfs-site: { dfs.replication: '3' }
repository_versions:
  - version: 2.2.1.0
    upgrade_package: upgrade-2.2
upgrade_packs:
  - name: upgrade-2.2
",
        )
        .unwrap();
        repo.add_stack(definition).unwrap();
        repo
    }

    #[test]
    fn test_repository_version_lookup() {
        let repo = repo();
        let rv = repo.repository_version("HDP", "2.2.1.0").unwrap().unwrap();
        assert_eq!(rv.stack, StackId::new("HDP", "2.2"));
        assert_eq!(rv.upgrade_package, "upgrade-2.2");
        assert!(repo.repository_version("HDP", "9.9").unwrap().is_none());
        assert!(repo.repository_version("PHD", "2.2.1.0").unwrap().is_none());
    }

    #[test]
    fn test_service_and_component() {
        let repo = repo();
        let stack = StackId::new("HDP", "2.2");
        let hdfs = repo.service(&stack, "HDFS").unwrap();
        assert_eq!(hdfs.config_types().len(), 1);
        let nn = repo.component(&stack, "HDFS", "NAMENODE").unwrap().unwrap();
        assert_eq!(nn.category, ComponentCategory::Master);
        let dn = repo.component(&stack, "HDFS", "DATANODE").unwrap().unwrap();
        assert_eq!(dn.category, ComponentCategory::Slave);
        assert!(repo.service(&stack, "YARN").is_err());
    }

    #[test]
    fn test_unknown_stack() {
        let repo = repo();
        assert!(repo.upgrade_packs(&StackId::new("HDP", "1.0")).is_err());
        assert_eq!(
            repo.upgrade_packs(&StackId::new("HDP", "2.2")).unwrap().len(),
            1
        );
    }
}
