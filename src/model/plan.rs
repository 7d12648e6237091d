//! Persisted plan entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ClusterId, RequestId, StageId};
use super::stack::Direction;

/// One compiled plan, bound to the execution request that runs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeEntity {
    /// Assigned by the plan store on create.
    #[serde(default)]
    pub upgrade_id: u64,
    pub cluster_id: ClusterId,
    pub request_id: RequestId,
    pub from_version: String,
    pub to_version: String,
    pub direction: Direction,
    pub groups: Vec<UpgradeGroupEntity>,
    pub created_at: DateTime<Utc>,
}

impl UpgradeEntity {
    pub fn items(&self) -> impl Iterator<Item = &UpgradeItemEntity> {
        self.groups.iter().flat_map(|g| g.items.iter())
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        self.items().map(|i| i.stage_id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeGroupEntity {
    pub name: String,
    pub title: String,
    pub items: Vec<UpgradeItemEntity>,
}

/// One stage worth of work: its text, serialized tasks and hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeItemEntity {
    pub stage_id: StageId,
    pub text: String,
    pub tasks: String,
    pub hosts: String,
}
