use std::time::Duration;

use nbk_protocol::ProtocolError;
use thiserror::Error;

use crate::channels::ChannelBindError;
use crate::lifecycle::LifecycleError;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("tooling error: {0}")]
    Tooling(#[from] ToolingError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    ChannelBind(#[from] ChannelBindError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
    #[error("handler for {expected} received {found} content")]
    UnexpectedContent {
        expected: &'static str,
        found: String,
    },
}

/// Failures reported by (or about) the tooling session.
///
/// `Clone` because one restart outcome is shared by every coalesced caller.
#[derive(Debug, Clone, Error)]
pub enum ToolingError {
    #[error("{0}")]
    Compile(String),
    #[error("{0}")]
    Run(String),
    #[error("tooling unavailable: {0}")]
    Unavailable(String),
    #[error("cell {0} has no module declaration")]
    MissingModule(i64),
    #[error("failed to start tooling session: {0}")]
    Start(String),
    #[error("tooling session did not exit within {0:?}")]
    DisposeTimeout(Duration),
    #[error("no tooling session is running")]
    NotRunning,
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ToolingError {
    /// `ename` reported to the front-end for execute failures.
    pub fn error_name(&self) -> &'static str {
        match self {
            ToolingError::Compile(_) => "Compilation Error",
            ToolingError::Run(_) => "Runtime Error",
            ToolingError::MissingModule(_) => "Missing Module",
            ToolingError::NotRunning | ToolingError::Lifecycle(_) => "Kernel Not Running",
            ToolingError::Unavailable(_)
            | ToolingError::Start(_)
            | ToolingError::DisposeTimeout(_) => "Tooling Error",
        }
    }
}
