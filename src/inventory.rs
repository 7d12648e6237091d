//! YAML inventory describing stacks, clusters and prerequisite rules.
//!
//! The inventory is loaded once at start-up and populates the in-memory
//! collaborators the controller runs against.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::Deserialize;
use tracing::info;

use crate::checks::{CheckRule, RuleChecks};
use crate::cluster::{ClusterSpec, MemoryClusterStore};
use crate::controller::Collaborators;
use crate::error::UpgradeError;
use crate::execution::MemoryScheduler;
use crate::persistence::MemoryUpgradeStore;
use crate::stack::{MemoryStackRepository, StackDefinition};
use crate::upgrade::PackExpander;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Inventory {
    #[serde(default)]
    pub stacks: Vec<StackDefinition>,
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
    #[serde(default)]
    pub checks: Vec<CheckRule>,
}

/// In-memory collaborators populated from an inventory.
pub struct Environment {
    pub store: Arc<MemoryClusterStore>,
    pub stacks: Arc<MemoryStackRepository>,
    pub scheduler: Arc<MemoryScheduler>,
    pub upgrades: Arc<MemoryUpgradeStore>,
    pub checks: Arc<RuleChecks>,
}

impl Environment {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            stacks: self.stacks.clone(),
            checks: self.checks.clone(),
            scheduler: self.scheduler.clone(),
            upgrades: self.upgrades.clone(),
            expander: Arc::new(PackExpander::new()),
        }
    }
}

impl Inventory {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse inventory")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read inventory {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("Invalid inventory {}", path.display()))
    }

    /// Populate fresh in-memory collaborators.
    ///
    /// Every cluster must run a stack the inventory defines.
    pub fn build(self) -> Result<Environment> {
        let stacks = Arc::new(MemoryStackRepository::new());
        let mut known = BTreeSet::new();
        for definition in self.stacks {
            known.insert(definition.id.clone());
            stacks.add_stack(definition)?;
        }

        let store = Arc::new(MemoryClusterStore::new());
        for spec in self.clusters {
            for stack in std::iter::once(&spec.current_stack).chain(spec.desired_stack.as_ref()) {
                if !known.contains(stack) {
                    return Err(UpgradeError::Validation(format!(
                        "Cluster {} uses undefined stack {stack}",
                        spec.name
                    ))
                    .into());
                }
            }
            store.add_cluster(spec)?;
        }

        let checks = Arc::new(RuleChecks::new(store.clone(), self.checks)?);
        info!(
            "Loaded inventory: {} stack(s), {} prerequisite rule(s)",
            known.len(),
            checks.len()
        );

        Ok(Environment {
            store,
            stacks,
            scheduler: Arc::new(MemoryScheduler::new()),
            upgrades: Arc::new(MemoryUpgradeStore::new()),
            checks,
        })
    }
}
