//! Immutable per-plan parameters.

use std::collections::BTreeMap;

use crate::cluster::HostResolver;
use crate::execution::command::params;
use crate::model::{ClusterId, Direction, StackId};

/// Everything fixed for the lifetime of one plan compile.
#[derive(Debug, Clone)]
pub struct UpgradeContext {
    version: String,
    original_stack: StackId,
    target_stack: StackId,
    direction: Direction,
    resolver: HostResolver,
    downgrade_from_version: Option<String>,
    skip_component_failures: bool,
    skip_service_check_failures: bool,
}

impl UpgradeContext {
    pub const fn new(
        resolver: HostResolver,
        original_stack: StackId,
        target_stack: StackId,
        version: String,
        direction: Direction,
    ) -> Self {
        Self {
            version,
            original_stack,
            target_stack,
            direction,
            resolver,
            downgrade_from_version: None,
            skip_component_failures: false,
            skip_service_check_failures: false,
        }
    }

    #[must_use]
    pub fn with_downgrade_from_version(mut self, version: Option<String>) -> Self {
        self.downgrade_from_version = version;
        self
    }

    #[must_use]
    pub const fn with_skip_failures(mut self, component: bool, service_check: bool) -> Self {
        self.skip_component_failures = component;
        self.skip_service_check_failures = service_check;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub const fn direction(&self) -> Direction {
        self.direction
    }

    pub const fn original_stack(&self) -> &StackId {
        &self.original_stack
    }

    pub const fn target_stack(&self) -> &StackId {
        &self.target_stack
    }

    pub const fn resolver(&self) -> &HostResolver {
        &self.resolver
    }

    pub const fn cluster(&self) -> ClusterId {
        self.resolver.cluster()
    }

    pub fn downgrade_from_version(&self) -> Option<&str> {
        self.downgrade_from_version.as_deref()
    }

    pub const fn skip_component_failures(&self) -> bool {
        self.skip_component_failures
    }

    pub const fn skip_service_check_failures(&self) -> bool {
        self.skip_service_check_failures
    }

    /// Parameters every stage of the plan carries.
    pub fn common_parameters(&self) -> BTreeMap<String, String> {
        let mut parameters = BTreeMap::from([
            (
                params::REFRESH_CONFIG_TAGS_BEFORE_EXECUTION.to_string(),
                "*".to_string(),
            ),
            (params::VERSION.to_string(), self.version.clone()),
            (
                params::UPGRADE_DIRECTION.to_string(),
                self.direction.text(false).to_string(),
            ),
            (
                params::ORIGINAL_STACK.to_string(),
                self.original_stack.to_string(),
            ),
            (params::TARGET_STACK.to_string(), self.target_stack.to_string()),
        ]);
        if let Some(from) = &self.downgrade_from_version {
            parameters.insert(params::DOWNGRADE_FROM_VERSION.to_string(), from.clone());
        }
        parameters
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cluster::MemoryClusterStore;

    fn context(direction: Direction) -> UpgradeContext {
        let resolver = HostResolver::new(Arc::new(MemoryClusterStore::new()), ClusterId(1));
        UpgradeContext::new(
            resolver,
            StackId::new("HDP", "2.2"),
            StackId::new("HDP", "2.3"),
            "2.3.0.0".to_string(),
            direction,
        )
    }

    #[test]
    fn test_common_parameters_upgrade() {
        let ctx = context(Direction::Upgrade);
        let p = ctx.common_parameters();
        assert_eq!(p[params::VERSION], "2.3.0.0");
        assert_eq!(p[params::UPGRADE_DIRECTION], "upgrade");
        assert_eq!(p[params::ORIGINAL_STACK], "HDP-2.2");
        assert_eq!(p[params::TARGET_STACK], "HDP-2.3");
        assert_eq!(p[params::REFRESH_CONFIG_TAGS_BEFORE_EXECUTION], "*");
        assert!(!p.contains_key(params::DOWNGRADE_FROM_VERSION));
    }

    #[test]
    fn test_common_parameters_downgrade() {
        let ctx = context(Direction::Downgrade)
            .with_downgrade_from_version(Some("2.3.0.0".to_string()))
            .with_skip_failures(true, false);
        let p = ctx.common_parameters();
        assert_eq!(p[params::UPGRADE_DIRECTION], "downgrade");
        assert_eq!(p[params::DOWNGRADE_FROM_VERSION], "2.3.0.0");
        assert!(ctx.skip_component_failures());
        assert!(!ctx.skip_service_check_failures());
    }
}
