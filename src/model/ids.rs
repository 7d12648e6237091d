//! Opaque identifiers for clusters, execution requests, stages and tasks.

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a managed cluster.
    ClusterId
);
id_type!(
    /// Identifier of an execution request owning all stages of one plan.
    RequestId
);
id_type!(
    /// Identifier of a stage, unique within its execution request.
    StageId
);
id_type!(
    /// Identifier of a single host task.
    TaskId
);

impl StageId {
    /// Stage id following `last`, starting from 1 for an empty request.
    pub const fn next_after(last: u64) -> Self {
        if last == 0 { Self(1) } else { Self(last + 1) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_id_next_after() {
        assert_eq!(StageId::next_after(0), StageId(1));
        assert_eq!(StageId::next_after(1), StageId(2));
        assert_eq!(StageId::next_after(41), StageId(42));
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&RequestId(7)).unwrap();
        assert_eq!(json, "7");
        let id: TaskId = serde_json::from_str("12").unwrap();
        assert_eq!(id, TaskId(12));
        assert_eq!(id.to_string(), "12");
    }
}
