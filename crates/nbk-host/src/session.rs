//! Shell-side kernel state and the protocol operations that act on it.
//!
//! A `KernelSession` is owned by the shell request loop, so its cell store is
//! only ever touched by one request at a time.

use std::sync::Arc;

use nbk_protocol::{
    CompleteReply, CompleteRequest, ErrorContent, ExecuteInput, ExecuteReply, ExecuteRequest,
    ExecuteResult, HistoryReply, InspectReply, InspectRequest, KernelMessage, ReplyError, Request,
    StreamName,
};
use serde_json::{Map, Value};

use crate::cells::{Cell, CellStore};
use crate::config::KernelConfig;
use crate::error::{KernelError, ToolingError};
use crate::handlers::KernelContext;
use crate::outbox::{Outbox, ReplyChannel};
use crate::runtime::ShutdownTrigger;
use crate::token::TokenSpan;
use crate::tooling::{RenderOutput, ToolingClient, ToolingSupervisor};

pub struct KernelSession {
    config: Arc<KernelConfig>,
    supervisor: Arc<ToolingSupervisor>,
    outbox: Outbox,
    shutdown: ShutdownTrigger,
    cells: CellStore,
    /// Tooling generation the cell store belongs to.
    generation: u64,
    setup_built: bool,
    /// Execution count of a submitted cell whose `execute_reply` is still owed.
    unanswered: Option<i64>,
}

impl KernelSession {
    pub fn new(
        config: Arc<KernelConfig>,
        supervisor: Arc<ToolingSupervisor>,
        outbox: Outbox,
        shutdown: ShutdownTrigger,
    ) -> Self {
        let cells = CellStore::new(config.module_naming.clone(), &config.setup_source);
        Self {
            config,
            supervisor,
            outbox,
            shutdown,
            cells,
            generation: 0,
            setup_built: false,
            unanswered: None,
        }
    }

    pub fn cells(&self) -> &CellStore {
        &self.cells
    }

    /// Discard session state that belongs to a replaced tooling session.
    pub fn sync_generation(&mut self) {
        let generation = self.supervisor.generation();
        if generation == self.generation {
            return;
        }
        if !self.cells.is_empty() || self.setup_built {
            tracing::info!(
                from = self.generation,
                to = generation,
                "tooling session replaced; resetting cells"
            );
        }
        self.cells = CellStore::new(self.config.module_naming.clone(), &self.config.setup_source);
        self.setup_built = false;
        self.generation = generation;
    }

    pub async fn execute(&mut self, request: &Request, content: &ExecuteRequest) {
        let client = match self.live_client() {
            Ok(client) => client,
            Err(err) => {
                let execution_count = self.cells.current().sequence;
                tracing::warn!("execute rejected: {err}");
                let error = ErrorContent::new(err.error_name(), &err.to_string());
                let reply = ExecuteReply::error(execution_count, error);
                self.reply(request, KernelMessage::ExecuteReply(reply)).await;
                return;
            }
        };

        self.cells.update(&content.code);
        let cell = self.cells.submit_current();
        let execution_count = cell.sequence;
        self.unanswered = Some(execution_count);
        self.outbox
            .publish(
                request,
                KernelMessage::ExecuteInput(ExecuteInput {
                    code: content.code.clone(),
                    execution_count,
                }),
            )
            .await;

        let outcome = self.build_and_run(request, client.as_ref(), &cell).await;
        self.unanswered = None;
        match outcome {
            Ok(output) => {
                let reply = ExecuteReply::ok(execution_count);
                self.reply(request, KernelMessage::ExecuteReply(reply)).await;
                self.outbox
                    .publish(
                        request,
                        KernelMessage::ExecuteResult(ExecuteResult {
                            execution_count,
                            data: output.data,
                            metadata: Map::new(),
                        }),
                    )
                    .await;
            }
            Err(err) => {
                tracing::info!(execution_count, "cell failed: {err}");
                let error = ErrorContent::new(err.error_name(), &err.to_string());
                self.report_failure(request, execution_count, error).await;
            }
        }
    }

    /// Answer an execute that was cut short by a handler failure.
    ///
    /// No-op unless a submitted cell is still waiting for its reply.
    pub async fn abandon_execute(&mut self, request: &Request, err: &KernelError) {
        let Some(execution_count) = self.unanswered.take() else {
            return;
        };
        tracing::error!(execution_count, "execute abandoned: {err}");
        let error = ErrorContent::new("Kernel Error", &err.to_string());
        self.report_failure(request, execution_count, error).await;
    }

    async fn report_failure(&self, request: &Request, execution_count: i64, error: ErrorContent) {
        let reply = ExecuteReply::error(execution_count, error.clone());
        self.reply(request, KernelMessage::ExecuteReply(reply)).await;
        self.outbox
            .publish(
                request,
                KernelMessage::Error(ReplyError {
                    execution_count,
                    error,
                }),
            )
            .await;
    }

    async fn build_and_run(
        &mut self,
        request: &Request,
        client: &dyn ToolingClient,
        cell: &Cell,
    ) -> Result<RenderOutput, ToolingError> {
        self.ensure_setup(request, client).await?;
        if cell.module_id.is_none() {
            return Err(ToolingError::MissingModule(cell.sequence));
        }
        let n = cell.sequence;
        self.progress(request, format!("Compiling cell {n}...\n")).await;
        let artifact = client.compile(cell).await?;
        self.progress(request, format!("Compilation finished, running cell {n}...\n"))
            .await;
        client.run(&artifact).await
    }

    /// Build the setup cell once per tooling session, before the first user cell.
    async fn ensure_setup(
        &mut self,
        request: &Request,
        client: &dyn ToolingClient,
    ) -> Result<(), ToolingError> {
        if self.setup_built {
            return Ok(());
        }
        let setup = self.cells.setup_cell().clone();
        if !setup.source.trim().is_empty() {
            self.progress(request, "Building setup cell...\n").await;
            client.compile(&setup).await?;
            self.progress(request, "Setup cell ready\n").await;
        }
        self.setup_built = true;
        Ok(())
    }

    pub async fn complete(&mut self, request: &Request, content: &CompleteRequest) {
        let span = TokenSpan::scan(&content.code, content.cursor_pos);
        let client = match self.live_client() {
            Ok(client) => client,
            Err(err) => {
                let error = ErrorContent::new(err.error_name(), &err.to_string());
                let reply = CompleteReply::Error(error);
                self.reply(request, KernelMessage::CompleteReply(reply)).await;
                return;
            }
        };

        self.cells.update(&content.code);
        let reply = match client.complete(self.cells.current(), &span).await {
            Ok(matches) => CompleteReply::Ok {
                matches,
                cursor_start: span.start,
                cursor_end: span.end,
                metadata: Map::new(),
            },
            Err(err) => {
                tracing::warn!("completion failed: {err}");
                CompleteReply::Ok {
                    matches: Vec::new(),
                    cursor_start: content.cursor_pos,
                    cursor_end: content.cursor_pos,
                    metadata: Map::new(),
                }
            }
        };
        self.reply(request, KernelMessage::CompleteReply(reply)).await;
    }

    pub async fn inspect(&mut self, request: &Request, content: &InspectRequest) {
        let span = TokenSpan::scan(&content.code, content.cursor_pos);
        let client = match self.live_client() {
            Ok(client) => client,
            Err(err) => {
                let error = ErrorContent::new(err.error_name(), &err.to_string());
                let reply = InspectReply::Error(error);
                self.reply(request, KernelMessage::InspectReply(reply)).await;
                return;
            }
        };

        self.cells.update(&content.code);
        let reply = match client.inspect(self.cells.current(), &span).await {
            Ok(Some(detail)) => {
                let mut data = Map::new();
                let html = format!("<pre>{}</pre>", escape_html(&detail));
                data.insert("text/html".into(), Value::String(html));
                data.insert("text/plain".into(), Value::String(detail));
                InspectReply::Ok {
                    found: true,
                    data,
                    metadata: Map::new(),
                }
            }
            Ok(None) => InspectReply::not_found(),
            Err(err) => {
                tracing::warn!("inspection failed: {err}");
                InspectReply::not_found()
            }
        };
        self.reply(request, KernelMessage::InspectReply(reply)).await;
    }

    pub async fn history(&mut self, request: &Request) {
        let reply = HistoryReply::empty();
        self.reply(request, KernelMessage::HistoryReply(reply)).await;
    }

    /// Live client for this session's generation; resyncs if a restart slipped in.
    fn live_client(&mut self) -> Result<Arc<dyn ToolingClient>, ToolingError> {
        let (client, generation) = self.supervisor.client()?;
        if generation != self.generation {
            self.sync_generation();
        }
        Ok(client)
    }

    async fn progress(&self, request: &Request, text: impl Into<String>) {
        self.outbox.stream(request, StreamName::Stdout, text).await;
    }

    async fn reply(&self, request: &Request, message: KernelMessage) {
        self.outbox.reply(ReplyChannel::Shell, request, message).await;
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(c),
        }
    }
    out
}

impl KernelContext for KernelSession {
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
        ReplyChannel::Shell
    }

    fn prepare(&mut self) {
        self.sync_generation();
    }
}
