//! Plan persistence.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use tracing::debug;

use crate::error::UpgradeError;
use crate::model::{ClusterId, RequestId, UpgradeEntity};

/// Stores compiled plans.
pub trait UpgradeStore: Send + Sync {
    /// Persist a new plan, returning it with its assigned id.
    fn create(&self, entity: UpgradeEntity) -> Result<UpgradeEntity>;
    fn find_by_request_id(&self, request: RequestId) -> Result<Option<UpgradeEntity>>;
    /// Plans of a cluster, oldest first.
    fn find_all(&self, cluster: ClusterId) -> Result<Vec<UpgradeEntity>>;
    /// Most recently created plan of a cluster.
    fn find_last(&self, cluster: ClusterId) -> Result<Option<UpgradeEntity>>;
}

/// Plan store keeping entities in memory, keyed by upgrade id.
#[derive(Debug)]
pub struct MemoryUpgradeStore {
    next_id: AtomicU64,
    upgrades: RwLock<BTreeMap<u64, UpgradeEntity>>,
}

impl Default for MemoryUpgradeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUpgradeStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            upgrades: RwLock::new(BTreeMap::new()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeMap<u64, UpgradeEntity>) -> T) -> Result<T> {
        let upgrades = self
            .upgrades
            .read()
            .map_err(|_| UpgradeError::poisoned("upgrade store"))?;
        Ok(f(&upgrades))
    }
}

impl UpgradeStore for MemoryUpgradeStore {
    fn create(&self, mut entity: UpgradeEntity) -> Result<UpgradeEntity> {
        let mut upgrades = self
            .upgrades
            .write()
            .map_err(|_| UpgradeError::poisoned("upgrade store"))?;
        if upgrades.values().any(|u| u.request_id == entity.request_id) {
            return Err(UpgradeError::Conflict(format!(
                "An upgrade for request {} already exists",
                entity.request_id
            ))
            .into());
        }

        entity.upgrade_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Persisted upgrade {} for request {}",
            entity.upgrade_id, entity.request_id
        );
        upgrades.insert(entity.upgrade_id, entity.clone());
        Ok(entity)
    }

    fn find_by_request_id(&self, request: RequestId) -> Result<Option<UpgradeEntity>> {
        self.read(|u| u.values().find(|e| e.request_id == request).cloned())
    }

    fn find_all(&self, cluster: ClusterId) -> Result<Vec<UpgradeEntity>> {
        self.read(|u| {
            u.values()
                .filter(|e| e.cluster_id == cluster)
                .cloned()
                .collect()
        })
    }

    fn find_last(&self, cluster: ClusterId) -> Result<Option<UpgradeEntity>> {
        self.read(|u| u.values().rev().find(|e| e.cluster_id == cluster).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::Direction;

    fn entity(cluster: u64, request: u64, to: &str) -> UpgradeEntity {
        UpgradeEntity {
            upgrade_id: 0,
            cluster_id: ClusterId(cluster),
            request_id: RequestId(request),
            from_version: "2.2.0.0".into(),
            to_version: to.into(),
            direction: Direction::Upgrade,
            groups: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_create_assigns_ids() {
        let store = MemoryUpgradeStore::new();
        let a = store.create(entity(1, 10, "2.2.1.0")).unwrap();
        let b = store.create(entity(1, 11, "2.3.0.0")).unwrap();
        assert_eq!(a.upgrade_id, 1);
        assert_eq!(b.upgrade_id, 2);
    }

    #[test]
    fn test_duplicate_request_conflicts() {
        let store = MemoryUpgradeStore::new();
        store.create(entity(1, 10, "2.2.1.0")).unwrap();
        let err = store.create(entity(1, 10, "2.2.1.0")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::Conflict(_))
        ));
    }

    #[test]
    fn test_find() {
        let store = MemoryUpgradeStore::new();
        store.create(entity(1, 10, "2.2.1.0")).unwrap();
        store.create(entity(2, 11, "2.3.0.0")).unwrap();
        store.create(entity(1, 12, "2.3.0.0")).unwrap();

        assert_eq!(store.find_all(ClusterId(1)).unwrap().len(), 2);
        assert_eq!(
            store.find_last(ClusterId(1)).unwrap().unwrap().request_id,
            RequestId(12)
        );
        assert!(store.find_last(ClusterId(3)).unwrap().is_none());
        assert_eq!(
            store
                .find_by_request_id(RequestId(11))
                .unwrap()
                .unwrap()
                .cluster_id,
            ClusterId(2)
        );
    }
}
