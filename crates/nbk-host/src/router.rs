//! Dispatch of validated requests to per-message-type handlers.

use std::collections::HashMap;

use async_trait::async_trait;
use nbk_protocol::Request;

use crate::error::KernelError;
use crate::execution::ExecutionStateMachine;

/// Handles one request type against a mutable handler context `C`.
#[async_trait]
pub trait RequestHandler<C: Send>: Send + Sync {
    /// Wire `msg_type` this handler is registered under.
    fn msg_type(&self) -> &'static str;

    async fn handle(&self, ctx: &mut C, request: &Request) -> Result<(), KernelError>;
}

/// Fixed routing table, assembled once at construction.
pub struct RequestRouter<C> {
    handlers: HashMap<&'static str, Box<dyn RequestHandler<C>>>,
}

impl<C: Send> Default for RequestRouter<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C: Send> RequestRouter<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl RequestHandler<C> + 'static) -> Self {
        let msg_type = handler.msg_type();
        if self.handlers.insert(msg_type, Box::new(handler)).is_some() {
            tracing::warn!(msg_type, "handler registered twice; keeping the last one");
        }
        self
    }

    fn route(&self, msg_type: &str) -> Option<&dyn RequestHandler<C>> {
        self.handlers.get(msg_type).map(|handler| handler.as_ref())
    }

    /// Run the handler for `request` inside the busy/idle `envelope`.
    ///
    /// Unknown types are logged and dropped without an envelope.
    pub async fn dispatch(
        &self,
        ctx: &mut C,
        request: &Request,
        envelope: &ExecutionStateMachine,
    ) -> Result<(), KernelError> {
        let Some(handler) = self.route(request.msg_type()) else {
            tracing::warn!(msg_type = request.msg_type(), "no handler; dropping request");
            return Ok(());
        };
        tracing::debug!(
            msg_type = request.msg_type(),
            msg_id = request.msg_id(),
            "handling request"
        );
        envelope.run(request, handler.handle(ctx, request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::Outbox;
    use nbk_protocol::{Header, WireMessage};
    use serde_json::json;

    struct Count(&'static str);

    #[async_trait]
    impl RequestHandler<Vec<String>> for Count {
        fn msg_type(&self) -> &'static str {
            self.0
        }

        async fn handle(
            &self,
            ctx: &mut Vec<String>,
            request: &Request,
        ) -> Result<(), KernelError> {
            ctx.push(request.msg_type().to_string());
            Ok(())
        }
    }

    fn request(msg_type: &str) -> Request {
        let wire = WireMessage::new(Header::new(msg_type, "s", "u"), json!({}));
        Request::from_wire(wire).unwrap()
    }

    #[tokio::test]
    async fn dispatches_by_msg_type() {
        let router = RequestRouter::new()
            .with(Count("kernel_info_request"))
            .with(Count("history_request"));
        let (outbox, mut rx) = Outbox::channel(8);
        let envelope = ExecutionStateMachine::new(outbox);
        let mut seen = Vec::new();
        router
            .dispatch(&mut seen, &request("history_request"), &envelope)
            .await
            .unwrap();
        assert_eq!(seen, vec!["history_request"]);
        assert_eq!(rx.iopub.try_recv().unwrap().content["execution_state"], "busy");
        assert_eq!(rx.iopub.try_recv().unwrap().content["execution_state"], "idle");
    }

    #[tokio::test]
    async fn unknown_types_are_dropped_without_an_envelope() {
        let router = RequestRouter::new().with(Count("kernel_info_request"));
        let (outbox, mut rx) = Outbox::channel(8);
        let envelope = ExecutionStateMachine::new(outbox);
        let mut seen = Vec::new();
        router
            .dispatch(&mut seen, &request("comm_open"), &envelope)
            .await
            .unwrap();
        assert!(seen.is_empty());
        assert!(rx.iopub.try_recv().is_err());
    }
}
