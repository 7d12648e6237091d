//! Desired-configuration reconciliation across a stack transition.
//!
//! Upgrades merge the new stack's defaults with the cluster's current values,
//! keeping anything an operator customized. Downgrades re-select the newest
//! configuration created under the current stack; nothing is deleted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cluster::ClusterStore;
use crate::model::{ClusterId, ConfigurationMap, Direction, Properties, StackId, UpgradePack};
use crate::stack::StackRepository;

/// Note recorded on configuration versions written by an upgrade.
pub const UPGRADE_CONFIG_NOTE: &str = "Configuration created for Upgrade";

/// What a reconcile call did to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing was written.
    Skipped(String),
    /// New configuration versions were created for these types.
    Merged { types: BTreeSet<String> },
    /// The latest configuration of the current stack was made desired again.
    Reverted,
}

impl ReconcileOutcome {
    /// Short label used in metrics.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "skipped",
            Self::Merged { .. } => "merged",
            Self::Reverted => "reverted",
        }
    }
}

/// Computes and applies the desired configuration for a plan.
pub struct ConfigReconciler {
    store: Arc<dyn ClusterStore>,
    stacks: Arc<dyn StackRepository>,
}

impl ConfigReconciler {
    pub fn new(store: Arc<dyn ClusterStore>, stacks: Arc<dyn StackRepository>) -> Self {
        Self { store, stacks }
    }

    pub fn reconcile(
        &self,
        stack_name: &str,
        cluster: ClusterId,
        version: &str,
        direction: Direction,
        pack: &UpgradePack,
    ) -> Result<ReconcileOutcome> {
        let Some(target) = self.stacks.repository_version(stack_name, version)? else {
            info!("Could not find version entity for {version}; not setting new configs");
            return Ok(ReconcileOutcome::Skipped(format!(
                "repository version {version} not found"
            )));
        };
        let target_stack = target.stack;

        let current_stack = self.store.current_stack(cluster)?;
        let desired_stack = self.store.desired_stack(cluster)?;
        let unchanged = match direction {
            Direction::Upgrade => current_stack == target_stack,
            Direction::Downgrade => desired_stack == target_stack,
        };
        if unchanged {
            debug!("Stack {target_stack} unchanged for {direction}, configuration left as is");
            return Ok(ReconcileOutcome::Skipped(format!(
                "stack {target_stack} unchanged"
            )));
        }

        match direction {
            Direction::Upgrade => {
                let merged = self.merge_for_upgrade(cluster, &current_stack, &target_stack, pack)?;
                self.store.set_desired_stack(cluster, &target_stack)?;
                // Configuration versions are stamped with the desired stack, so
                // they are written only after it moves.
                self.store
                    .create_config_types(cluster, &merged, UPGRADE_CONFIG_NOTE)?;
                let types: BTreeSet<String> = merged.types().cloned().collect();
                info!(
                    "Created {} configuration type(s) for {} -> {}",
                    types.len(),
                    current_stack,
                    target_stack
                );
                Ok(ReconcileOutcome::Merged { types })
            }
            Direction::Downgrade => {
                self.store
                    .apply_latest_configurations(cluster, &current_stack)?;
                self.store.set_desired_stack(cluster, &target_stack)?;
                info!("Reapplied latest {current_stack} configuration, desired stack {target_stack}");
                Ok(ReconcileOutcome::Reverted)
            }
        }
    }

    /// New-stack defaults overlaid with the cluster's current values.
    fn merge_for_upgrade(
        &self,
        cluster: ClusterId,
        current_stack: &StackId,
        target_stack: &StackId,
        pack: &UpgradePack,
    ) -> Result<ConfigurationMap> {
        let old_defaults = self.default_properties(current_stack, cluster)?;
        let mut merged = self.default_properties(target_stack, cluster)?;

        let skip = self.skip_config_types(target_stack, pack)?;
        for config_type in &skip {
            if merged.remove(config_type).is_some() {
                info!("Removing configs for config-type {config_type}");
            }
        }

        let existing = self.store.desired_configs(cluster)?;
        for config_type in existing.types() {
            if skip.contains(config_type) {
                info!(
                    "Skipping config-type {config_type} as upgrade-pack contains no updates to its service"
                );
                continue;
            }
            let Some(current) = existing.get(config_type) else {
                continue;
            };

            if !merged.contains_key(config_type) {
                merged.insert(config_type.clone(), current.clone());
                continue;
            }
            let Some(defaults) = merged.get_mut(config_type) else {
                continue;
            };

            for (key, value) in current {
                match defaults.get(key) {
                    None => {
                        defaults.insert(key.clone(), value.clone());
                    }
                    Some(new_default) if new_default != value => {
                        // Only a value that differs from the old stack default counts
                        // as customized.
                        if let Some(old) = old_defaults.get(config_type)
                            && old.get(key) != Some(value)
                        {
                            defaults.insert(key.clone(), value.clone());
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        let mut configs = ConfigurationMap::new();
        for (config_type, properties) in merged {
            configs.insert_type(config_type, properties);
        }
        Ok(configs)
    }

    /// Default properties of `stack` for the services installed in the cluster.
    fn default_properties(
        &self,
        stack: &StackId,
        cluster: ClusterId,
    ) -> Result<BTreeMap<String, Properties>> {
        let installed = self.store.services(cluster)?;
        let mut defaults = BTreeMap::new();
        for (name, service) in self.stacks.services(stack)? {
            if !installed.contains(&name) {
                continue;
            }
            for (config_type, properties) in service.configurations {
                defaults
                    .entry(config_type)
                    .or_insert_with(Properties::new)
                    .extend(properties);
            }
        }
        Ok(defaults)
    }

    /// Types owned only by target-stack services the pack never touches.
    ///
    /// A type owned by any pack service is never skipped, whatever other
    /// services also claim it.
    fn skip_config_types(&self, target_stack: &StackId, pack: &UpgradePack) -> Result<BTreeSet<String>> {
        let stack_services = self.stacks.services(target_stack)?;
        let pack_services = pack.services_for(Direction::Upgrade);

        let pack_types: BTreeSet<String> = stack_services
            .iter()
            .filter(|(name, _)| pack_services.contains(*name))
            .flat_map(|(_, info)| info.config_types())
            .collect();

        Ok(stack_services
            .iter()
            .filter(|(name, _)| !pack_services.contains(*name))
            .flat_map(|(_, info)| info.config_types())
            .filter(|t| !pack_types.contains(t))
            .collect())
    }
}
