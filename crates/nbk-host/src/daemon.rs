//! Serial request loop shared by the shell and control channels.

use nbk_protocol::Request;
use tokio::sync::{broadcast, mpsc};

use crate::error::KernelError;
use crate::execution::ExecutionStateMachine;
use crate::handlers::KernelContext;
use crate::router::RequestRouter;

/// Processes one request at a time, in arrival order, each wrapped in a
/// busy/idle envelope. Runs until shutdown or until its queue closes.
pub struct RequestLoop<C> {
    name: &'static str,
    ctx: C,
    router: RequestRouter<C>,
    execution: ExecutionStateMachine,
    requests: mpsc::Receiver<Request>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<C: KernelContext> RequestLoop<C> {
    pub fn new(
        name: &'static str,
        ctx: C,
        router: RequestRouter<C>,
        requests: mpsc::Receiver<Request>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let execution = ExecutionStateMachine::new(ctx.outbox().clone());
        Self {
            name,
            ctx,
            router,
            execution,
            requests,
            shutdown_rx,
        }
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    pub async fn run(mut self) -> C {
        tracing::debug!(channel = self.name, "request loop started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    tracing::debug!(channel = self.name, "shutdown signal received");
                    break;
                }
                request = self.requests.recv() => match request {
                    Some(request) => {
                        let msg_type = request.msg_type().to_string();
                        if let Err(err) = self.process(request).await {
                            tracing::error!(
                                channel = self.name,
                                msg_type = %msg_type,
                                "request failed: {err}"
                            );
                        }
                    }
                    None => {
                        tracing::debug!(channel = self.name, "request queue closed");
                        break;
                    }
                },
            }
        }
        self.ctx
    }

    /// Handle one request. Handler errors, panics included, come back as
    /// `Err` and leave the loop able to take the next request.
    pub async fn process(&mut self, request: Request) -> Result<(), KernelError> {
        self.ctx.prepare();
        self.router
            .dispatch(&mut self.ctx, &request, &self.execution)
            .await
    }
}
