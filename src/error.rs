//! Custom error types for ruo.

use thiserror::Error;

use crate::checks::PrereqCheckResult;

/// Errors that can occur while compiling or controlling an upgrade plan.
#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    PreconditionFailed {
        message: String,
        failed: Vec<PrereqCheckResult>,
    },

    #[error("There are no groupings available")]
    PlanEmpty,

    #[error(
        "Suitable hosts not found, component={component}, service={service}, cluster={cluster}, actionName={action}"
    )]
    NoSuitableHosts {
        cluster: String,
        service: String,
        component: String,
        action: String,
    },

    #[error(
        "Request specifies host {host} but it is not a valid host based on the target service={service} and component={component}"
    )]
    HostNotCandidate {
        host: String,
        service: String,
        component: String,
    },

    #[error("Unsupported target type = {0}")]
    UnsupportedTargetType(String),

    #[error("Cannot delete Upgrades")]
    DeleteNotSupported,

    #[error("Store error: {0}")]
    Store(String),
}

impl UpgradeError {
    /// Error for a poisoned lock guarding in-memory state.
    pub fn poisoned(what: &str) -> Self {
        Self::Store(format!("{what} lock poisoned"))
    }

    /// Returns true if the request itself was malformed or unsatisfiable.
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::PlanEmpty)
    }

    /// Short snake_case name of the error kind, used as a metric label.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::PlanEmpty => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::NoSuitableHosts { .. }
            | Self::HostNotCandidate { .. }
            | Self::UnsupportedTargetType(_) => "host_selection",
            Self::DeleteNotSupported => "not_supported",
            Self::Store(_) => "store",
        }
    }

    /// Returns true if host targeting could not be satisfied.
    pub const fn is_host_selection(&self) -> bool {
        matches!(
            self,
            Self::NoSuitableHosts { .. }
                | Self::HostNotCandidate { .. }
                | Self::UnsupportedTargetType(_)
        )
    }
}
