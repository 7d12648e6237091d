//! Execution side of a plan: commands, host targeting and the scheduler seam.

pub mod command;
pub mod materializer;
pub mod scheduler;
pub mod targets;

pub use command::{ActionContext, RequestResourceFilter};
pub use materializer::{CommandMaterializer, CustomCommand};
pub use scheduler::{ExecutionRequest, ExecutionScheduler, MemoryScheduler, ServerAction, Stage};
