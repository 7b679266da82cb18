//! Busy/idle envelope around request handling.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use nbk_protocol::{ExecutionState, KernelMessage, Request, Status};

use crate::error::KernelError;
use crate::outbox::Outbox;

/// Publishes `busy` before and `idle` after every handled request.
///
/// `idle` goes out on every exit path, including handler errors and panics.
/// A panic is reported as [`KernelError::HandlerPanicked`] so the request
/// loop survives it.
#[derive(Debug, Clone)]
pub struct ExecutionStateMachine {
    outbox: Outbox,
}

impl ExecutionStateMachine {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }

    pub async fn run<F>(&self, request: &Request, handler: F) -> Result<(), KernelError>
    where
        F: Future<Output = Result<(), KernelError>>,
    {
        self.publish(request, ExecutionState::Busy).await;
        let outcome = catch_panic(handler).await;
        self.publish(request, ExecutionState::Idle).await;
        outcome
    }

    async fn publish(&self, request: &Request, execution_state: ExecutionState) {
        self.outbox
            .publish(request, KernelMessage::Status(Status { execution_state }))
            .await;
    }
}

/// Await `handler`, turning a panic into [`KernelError::HandlerPanicked`].
pub async fn catch_panic<F>(handler: F) -> Result<(), KernelError>
where
    F: Future<Output = Result<(), KernelError>>,
{
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(KernelError::HandlerPanicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
