//! Notebook kernel host.
//!
//! Wires the Jupyter channels to a pluggable language-tooling backend:
//! - [`channels`]: bound heartbeat/shell/control/iopub sockets
//! - [`router`] and [`handlers`]: per-`msg_type` request dispatch
//! - [`session`]: cell history and the execute/complete/inspect operations
//! - [`tooling`]: the tooling contract, its supervisor and backends
//! - [`runtime`]: assembly and teardown of a running kernel

pub mod cells;
pub mod channels;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod execution;
pub mod handlers;
pub mod lifecycle;
pub mod outbox;
pub mod router;
pub mod runtime;
pub mod session;
pub mod token;
pub mod tooling;

pub use cells::{Cell, CellStore, SETUP_SEQUENCE};
pub use channels::{ChannelBindError, ChannelEndpoints, ChannelSet};
pub use config::{KernelConfig, ModuleNaming, ToolingProfile};
pub use error::{KernelError, ToolingError};
pub use lifecycle::KernelLifecycleState;
pub use outbox::{Outbox, OutboxReceivers, ReplyChannel};
pub use runtime::{KernelHandle, KernelRuntime, ShutdownTrigger};
pub use session::KernelSession;
pub use token::TokenSpan;
