//! Kernel lifecycle states and their legal transitions.

use std::fmt;

use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelLifecycleState {
    Uninitialized,
    Starting,
    Running,
    Restarting,
    Stopped,
}

impl KernelLifecycleState {
    pub fn can_transition_to(self, to: KernelLifecycleState) -> bool {
        use KernelLifecycleState::*;
        matches!(
            (self, to),
            (Uninitialized, Starting)
                | (Uninitialized, Stopped)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Restarting)
                | (Running, Stopped)
                | (Restarting, Running)
                | (Restarting, Stopped)
                | (Stopped, Restarting)
        )
    }
}

impl fmt::Display for KernelLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KernelLifecycleState::Uninitialized => "uninitialized",
            KernelLifecycleState::Starting => "starting",
            KernelLifecycleState::Running => "running",
            KernelLifecycleState::Restarting => "restarting",
            KernelLifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid lifecycle transition {from} -> {to}")]
pub struct LifecycleError {
    pub from: KernelLifecycleState,
    pub to: KernelLifecycleState,
}

/// Observable lifecycle cell. Writers go through [`Lifecycle::transition`].
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<KernelLifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(KernelLifecycleState::Uninitialized);
        Self { tx }
    }

    pub fn current(&self) -> KernelLifecycleState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<KernelLifecycleState> {
        self.tx.subscribe()
    }

    /// Apply `from -> to` atomically; rejected transitions leave the state untouched.
    pub fn transition(&self, to: KernelLifecycleState) -> Result<(), LifecycleError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(to) {
                tracing::debug!(from = %state, %to, "lifecycle transition");
                *state = to;
                true
            } else {
                result = Err(LifecycleError { from: *state, to });
                false
            }
        });
        result
    }
}
