//! Declarative prerequisite rules evaluated against cluster state.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use super::{PrereqCheckResult, PrereqCheckStatus, PrerequisiteChecks};
use crate::cluster::{ClusterStore, OperationLevel};
use crate::model::{ClusterId, RepositoryVersion, StackId};

/// Status reported when a rule is violated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Fail,
    Warning,
}

impl From<Severity> for PrereqCheckStatus {
    fn from(value: Severity) -> Self {
        match value {
            Severity::Fail => Self::Fail,
            Severity::Warning => Self::Warning,
        }
    }
}

/// One rule from the inventory.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckRule {
    /// The component must not be installed anywhere in the cluster.
    ComponentAbsent {
        id: String,
        service: String,
        component: String,
        #[serde(default)]
        severity: Severity,
        /// Only evaluated for upgrades onto this stack.
        #[serde(default)]
        target_stack: Option<StackId>,
    },
    /// The desired configuration must carry these properties, optionally
    /// with values matching `pattern`.
    RequiredProperties {
        id: String,
        config_type: String,
        properties: Vec<String>,
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        severity: Severity,
        #[serde(default)]
        target_stack: Option<StackId>,
    },
    /// No host may be in maintenance.
    HostsNotInMaintenance {
        id: String,
        #[serde(default)]
        severity: Severity,
        #[serde(default)]
        target_stack: Option<StackId>,
    },
}

impl CheckRule {
    pub fn id(&self) -> &str {
        match self {
            Self::ComponentAbsent { id, .. }
            | Self::RequiredProperties { id, .. }
            | Self::HostsNotInMaintenance { id, .. } => id,
        }
    }

    const fn severity(&self) -> Severity {
        match self {
            Self::ComponentAbsent { severity, .. }
            | Self::RequiredProperties { severity, .. }
            | Self::HostsNotInMaintenance { severity, .. } => *severity,
        }
    }

    fn applies_to(&self, stack: &StackId) -> bool {
        let target = match self {
            Self::ComponentAbsent { target_stack, .. }
            | Self::RequiredProperties { target_stack, .. }
            | Self::HostsNotInMaintenance { target_stack, .. } => target_stack,
        };
        target.as_ref().is_none_or(|t| t == stack)
    }
}

/// Evaluates inventory rules through the cluster store.
pub struct RuleChecks {
    store: Arc<dyn ClusterStore>,
    rules: Vec<(CheckRule, Option<Regex>)>,
}

impl RuleChecks {
    /// Fails when a rule carries an invalid pattern.
    pub fn new(store: Arc<dyn ClusterStore>, rules: Vec<CheckRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let pattern = match &rule {
                    CheckRule::RequiredProperties {
                        pattern: Some(p),
                        id,
                        ..
                    } => Some(
                        Regex::new(p).with_context(|| format!("Invalid pattern in check {id}"))?,
                    ),
                    _ => None,
                };
                Ok((rule, pattern))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { store, rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn evaluate(
        &self,
        rule: &CheckRule,
        pattern: Option<&Regex>,
        cluster: ClusterId,
    ) -> Result<PrereqCheckResult> {
        let mut result = PrereqCheckResult::pass(rule.id());

        match rule {
            CheckRule::ComponentAbsent {
                service, component, ..
            } => {
                let installed = self.store.services(cluster)?.contains(service)
                    && self.store.components(cluster, service)?.contains(component);
                if installed {
                    result.failed_on = self
                        .store
                        .component_hosts(cluster, service, component)?
                        .into_iter()
                        .collect();
                    result.reason =
                        format!("{component} must be removed before upgrading {service}");
                }
            }
            CheckRule::RequiredProperties {
                config_type,
                properties,
                ..
            } => {
                let desired = self.store.desired_configs(cluster)?;
                for property in properties {
                    let ok = desired
                        .property(config_type, property)
                        .is_some_and(|v| pattern.is_none_or(|p| p.is_match(v)));
                    if !ok {
                        result.failed_on.push(property.clone());
                    }
                }
                if !result.failed_on.is_empty() {
                    result.reason = format!(
                        "{config_type} is missing or has invalid values for {}",
                        result.failed_on.join(", ")
                    );
                }
            }
            CheckRule::HostsNotInMaintenance { .. } => {
                for host in self.store.hosts(cluster)? {
                    if !self.store.is_operation_allowed(
                        cluster,
                        OperationLevel::Cluster,
                        None,
                        None,
                        &host,
                    )? {
                        result.failed_on.push(host);
                    }
                }
                if !result.failed_on.is_empty() {
                    result.reason = format!(
                        "{} host(s) are in maintenance mode",
                        result.failed_on.len()
                    );
                }
            }
        }

        if !result.failed_on.is_empty() {
            result.status = rule.severity().into();
        }
        Ok(result)
    }
}

impl PrerequisiteChecks for RuleChecks {
    fn run(&self, cluster_name: &str, version: &RepositoryVersion) -> Result<Vec<PrereqCheckResult>> {
        let cluster = self.store.cluster_id(cluster_name)?;
        let mut results = Vec::new();
        for (rule, pattern) in &self.rules {
            if !rule.applies_to(&version.stack) {
                debug!("Check {} does not apply to {}", rule.id(), version.stack);
                continue;
            }
            results.push(self.evaluate(rule, pattern.as_ref(), cluster)?);
        }
        info!(
            "Ran {} prerequisite check(s) for {} -> {}",
            results.len(),
            cluster_name,
            version.version
        );
        Ok(results)
    }
}
