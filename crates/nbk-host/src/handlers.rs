//! Request handlers for the shell and control routers.

use std::sync::Arc;

use async_trait::async_trait;
use nbk_protocol::{
    KernelInfoReply, KernelMessage, PROTOCOL_VERSION, Request, RequestContent, ShutdownReply,
};

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::execution::catch_panic;
use crate::outbox::{Outbox, ReplyChannel};
use crate::router::{RequestHandler, RequestRouter};
use crate::runtime::ShutdownTrigger;
use crate::session::KernelSession;
use crate::tooling::ToolingSupervisor;

/// What a request loop exposes to the handlers it dispatches to.
pub trait KernelContext: Send + Sync {
    fn config(&self) -> &KernelConfig;
    fn supervisor(&self) -> &Arc<ToolingSupervisor>;
    fn outbox(&self) -> &Outbox;
    fn shutdown(&self) -> &ShutdownTrigger;
    fn reply_channel(&self) -> ReplyChannel;

    /// Called before each request is dispatched.
    fn prepare(&mut self) {}
}

pub fn shell_router() -> RequestRouter<KernelSession> {
    RequestRouter::new()
        .with(KernelInfoHandler)
        .with(ExecuteHandler)
        .with(CompleteHandler)
        .with(InspectHandler)
        .with(HistoryHandler)
        .with(ShutdownHandler)
}

pub fn control_router<C: KernelContext + 'static>() -> RequestRouter<C> {
    RequestRouter::new()
        .with(KernelInfoHandler)
        .with(ShutdownHandler)
}

pub fn kernel_info(config: &KernelConfig) -> KernelInfoReply {
    KernelInfoReply {
        status: "ok".into(),
        protocol_version: PROTOCOL_VERSION.into(),
        implementation: "nbk".into(),
        implementation_version: env!("CARGO_PKG_VERSION").into(),
        language_info: config.language.clone(),
        banner: config.banner.clone(),
        help_links: Vec::new(),
    }
}

fn unexpected(expected: &'static str, request: &Request) -> KernelError {
    KernelError::UnexpectedContent {
        expected,
        found: request.msg_type().to_string(),
    }
}

pub struct KernelInfoHandler;

#[async_trait]
impl<C: KernelContext> RequestHandler<C> for KernelInfoHandler {
    fn msg_type(&self) -> &'static str {
        "kernel_info_request"
    }

    async fn handle(&self, ctx: &mut C, request: &Request) -> Result<(), KernelError> {
        let reply = kernel_info(ctx.config());
        ctx.outbox()
            .reply(ctx.reply_channel(), request, KernelMessage::KernelInfoReply(reply))
            .await;
        Ok(())
    }
}

/// `shutdown_request` on either channel.
///
/// With `restart` the tooling session is replaced and the kernel keeps
/// serving; without it the tooling is stopped and, after the reply has had
/// time to flush, the kernel is asked to exit.
pub struct ShutdownHandler;

#[async_trait]
impl<C: KernelContext> RequestHandler<C> for ShutdownHandler {
    fn msg_type(&self) -> &'static str {
        "shutdown_request"
    }

    async fn handle(&self, ctx: &mut C, request: &Request) -> Result<(), KernelError> {
        let RequestContent::Shutdown(content) = &request.content else {
            return Err(unexpected("shutdown_request", request));
        };
        let channel = ctx.reply_channel();
        if content.restart {
            tracing::info!(?channel, "restart requested");
            let reply = match ctx.supervisor().restart().await {
                Ok(_) => ShutdownReply::ok(true),
                Err(err) => {
                    tracing::error!("restart failed: {err}");
                    ShutdownReply {
                        status: "error".into(),
                        restart: true,
                    }
                }
            };
            ctx.prepare();
            ctx.outbox()
                .reply(channel, request, KernelMessage::ShutdownReply(reply))
                .await;
        } else {
            tracing::info!(?channel, "shutdown requested");
            ctx.supervisor().stop().await;
            let reply = ShutdownReply::ok(false);
            ctx.outbox()
                .reply(channel, request, KernelMessage::ShutdownReply(reply))
                .await;
            ctx.shutdown().fire_after(ctx.config().shutdown_linger);
        }
        Ok(())
    }
}

pub struct ExecuteHandler;

#[async_trait]
impl RequestHandler<KernelSession> for ExecuteHandler {
    fn msg_type(&self) -> &'static str {
        "execute_request"
    }

    async fn handle(
        &self,
        session: &mut KernelSession,
        request: &Request,
    ) -> Result<(), KernelError> {
        let RequestContent::Execute(content) = &request.content else {
            return Err(unexpected("execute_request", request));
        };
        let outcome = catch_panic(async {
            session.execute(request, content).await;
            Ok(())
        })
        .await;
        if let Err(err) = &outcome {
            session.abandon_execute(request, err).await;
        }
        outcome
    }
}

pub struct CompleteHandler;

#[async_trait]
impl RequestHandler<KernelSession> for CompleteHandler {
    fn msg_type(&self) -> &'static str {
        "complete_request"
    }

    async fn handle(
        &self,
        session: &mut KernelSession,
        request: &Request,
    ) -> Result<(), KernelError> {
        let RequestContent::Complete(content) = &request.content else {
            return Err(unexpected("complete_request", request));
        };
        session.complete(request, content).await;
        Ok(())
    }
}

pub struct InspectHandler;

#[async_trait]
impl RequestHandler<KernelSession> for InspectHandler {
    fn msg_type(&self) -> &'static str {
        "inspect_request"
    }

    async fn handle(
        &self,
        session: &mut KernelSession,
        request: &Request,
    ) -> Result<(), KernelError> {
        let RequestContent::Inspect(content) = &request.content else {
            return Err(unexpected("inspect_request", request));
        };
        session.inspect(request, content).await;
        Ok(())
    }
}

pub struct HistoryHandler;

#[async_trait]
impl RequestHandler<KernelSession> for HistoryHandler {
    fn msg_type(&self) -> &'static str {
        "history_request"
    }

    async fn handle(
        &self,
        session: &mut KernelSession,
        request: &Request,
    ) -> Result<(), KernelError> {
        session.history(request).await;
        Ok(())
    }
}
