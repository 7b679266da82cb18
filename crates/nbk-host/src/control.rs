//! Control-channel context.
//!
//! Control requests run on their own loop so a shutdown or restart can be
//! serviced while the shell loop is stuck in a long execute.

use std::sync::Arc;

use crate::config::KernelConfig;
use crate::handlers::KernelContext;
use crate::outbox::{Outbox, ReplyChannel};
use crate::runtime::ShutdownTrigger;
use crate::tooling::ToolingSupervisor;

pub struct ControlContext {
    config: Arc<KernelConfig>,
    supervisor: Arc<ToolingSupervisor>,
    outbox: Outbox,
    shutdown: ShutdownTrigger,
}

impl ControlContext {
    pub fn new(
        config: Arc<KernelConfig>,
        supervisor: Arc<ToolingSupervisor>,
        outbox: Outbox,
        shutdown: ShutdownTrigger,
    ) -> Self {
        Self {
            config,
            supervisor,
            outbox,
            shutdown,
        }
    }
}

impl KernelContext for ControlContext {
    fn config(&self) -> &KernelConfig {
        &self.config
    }

    fn supervisor(&self) -> &Arc<ToolingSupervisor> {
        &self.supervisor
    }

    fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    fn shutdown(&self) -> &ShutdownTrigger {
        &self.shutdown
    }

    fn reply_channel(&self) -> ReplyChannel {
        ReplyChannel::Control
    }
}
