//! Domain model: stacks, configuration, upgrade packs, persisted plans and task status.

pub mod config;
pub mod ids;
pub mod pack;
pub mod plan;
pub mod stack;
pub mod status;

pub use config::{ConfigTags, ConfigurationMap, Properties};
pub use ids::{ClusterId, RequestId, StageId, TaskId};
pub use pack::{GroupingKind, Task, UpgradePack};
pub use plan::{UpgradeEntity, UpgradeGroupEntity, UpgradeItemEntity};
pub use stack::{Direction, RepositoryVersion, StackId};
pub use status::{CalculatedStatus, HostRoleStatus, StageSummary};
