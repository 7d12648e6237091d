//! Upgrade plan compilation.
//!
//! A pack is expanded into groups of stage wrappers ([`sequence`]), each
//! wrapper becomes one or more persisted items and scheduler stages
//! ([`compiler`], [`stages`]).

pub mod compiler;
pub mod context;
pub mod sequence;
pub mod stages;
pub mod variables;

pub use compiler::PlanCompiler;
pub use context::UpgradeContext;
pub use sequence::{PackExpander, SequenceExpander, StageType};
