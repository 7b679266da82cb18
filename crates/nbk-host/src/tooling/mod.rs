//! Tooling backends: the contract, the supervisor that owns the live session,
//! and the concrete implementations.

pub mod command;
pub mod supervisor;
pub mod traits;

#[cfg(any(feature = "test-fixtures", test))]
pub mod mock;

pub use command::{CommandTooling, CommandToolingFactory};
pub use supervisor::ToolingSupervisor;
pub use traits::{Artifact, RenderOutput, ToolingClient, ToolingFactory};
