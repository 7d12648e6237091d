//! Stack identifiers, upgrade direction and repository versions.

use serde::{Deserialize, Serialize};

use crate::error::UpgradeError;

/// A software stack, written `NAME-VERSION` (e.g. `HDP-2.2`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StackId {
    pub name: String,
    pub version: String,
}

impl StackId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse `NAME-VERSION`, splitting on the last dash.
    pub fn parse(value: &str) -> Result<Self, UpgradeError> {
        match value.rsplit_once('-') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(Self::new(name, version))
            }
            _ => Err(UpgradeError::Validation(format!(
                "Invalid stack id '{value}', expected NAME-VERSION"
            ))),
        }
    }
}

impl std::fmt::Display for StackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

impl TryFrom<String> for StackId {
    type Error = UpgradeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StackId> for String {
    fn from(value: StackId) -> Self {
        value.to_string()
    }
}

/// Direction of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Upgrade,
    Downgrade,
}

impl Direction {
    pub const fn is_upgrade(self) -> bool {
        matches!(self, Self::Upgrade)
    }

    pub const fn is_downgrade(self) -> bool {
        matches!(self, Self::Downgrade)
    }

    /// Noun form, e.g. "upgrade" or "Upgrade".
    pub const fn text(self, proper: bool) -> &'static str {
        match (self, proper) {
            (Self::Upgrade, true) => "Upgrade",
            (Self::Upgrade, false) => "upgrade",
            (Self::Downgrade, true) => "Downgrade",
            (Self::Downgrade, false) => "downgrade",
        }
    }

    /// Progressive verb form used in request context text.
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Upgrade => "Upgrading",
            Self::Downgrade => "Downgrading",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upgrade => write!(f, "UPGRADE"),
            Self::Downgrade => write!(f, "DOWNGRADE"),
        }
    }
}

/// A registered repository version of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RepositoryVersion {
    pub stack: StackId,
    pub version: String,
    /// Name of the upgrade pack that moves a cluster onto this version.
    #[serde(default)]
    pub upgrade_package: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_id_parse() {
        let id = StackId::parse("HDP-2.2").unwrap();
        assert_eq!(id.name, "HDP");
        assert_eq!(id.version, "2.2");
        assert_eq!(id.to_string(), "HDP-2.2");
    }

    #[test]
    fn test_stack_id_parse_uses_last_dash() {
        let id = StackId::parse("HDP-LEGACY-2.1").unwrap();
        assert_eq!(id.name, "HDP-LEGACY");
        assert_eq!(id.version, "2.1");
    }

    #[test]
    fn test_stack_id_parse_invalid() {
        assert!(StackId::parse("HDP").is_err());
        assert!(StackId::parse("-2.2").is_err());
        assert!(StackId::parse("HDP-").is_err());
    }

    #[test]
    fn test_stack_id_serde_as_string() {
        let id: StackId = serde_yaml::from_str("HDP-2.3").unwrap();
        assert_eq!(id, StackId::new("HDP", "2.3"));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"HDP-2.3\"");
    }

    #[test]
    fn test_direction_text() {
        assert_eq!(Direction::Upgrade.text(false), "upgrade");
        assert_eq!(Direction::Downgrade.text(true), "Downgrade");
        assert_eq!(Direction::Downgrade.verb(), "Downgrading");
        assert_eq!(Direction::Upgrade.to_string(), "UPGRADE");
    }

    #[test]
    fn test_direction_serde() {
        let d: Direction = serde_json::from_str("\"DOWNGRADE\"").unwrap();
        assert!(d.is_downgrade());
    }
}
