#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nbk_host::control::ControlContext;
use nbk_host::daemon::RequestLoop;
use nbk_host::handlers::{control_router, shell_router};
use nbk_host::tooling::ToolingSupervisor;
use nbk_host::tooling::mock::MockTooling;
use nbk_host::{
    KernelConfig, KernelError, KernelSession, Outbox, OutboxReceivers, ShutdownTrigger,
};
use nbk_protocol::{Header, Request, WireMessage};
use serde_json::Value;
use tokio::sync::mpsc;

pub fn request(msg_type: &str, content: Value) -> Request {
    let mut wire = WireMessage::new(Header::new(msg_type, "session-1", "tester"), content);
    wire.identities = vec![Bytes::from_static(b"client-1")];
    Request::from_wire(wire).expect("valid request")
}

pub fn drain(rx: &mut mpsc::Receiver<WireMessage>) -> Vec<WireMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

pub fn msg_types(messages: &[WireMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.header.msg_type.as_str()).collect()
}

/// iopub traffic without progress streams.
pub fn without_streams(messages: Vec<WireMessage>) -> Vec<WireMessage> {
    messages
        .into_iter()
        .filter(|m| m.header.msg_type != "stream")
        .collect()
}

pub fn stream_text(messages: &[WireMessage]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.header.msg_type == "stream")
        .map(|m| m.content["text"].as_str().unwrap_or_default().to_string())
        .collect()
}

pub fn execution_states(messages: &[WireMessage]) -> Vec<&str> {
    messages
        .iter()
        .filter(|m| m.header.msg_type == "status")
        .filter_map(|m| m.content["execution_state"].as_str())
        .collect()
}

/// Shell loop driven request-by-request over in-memory queues.
pub struct ShellHarness {
    pub mock: MockTooling,
    pub supervisor: Arc<ToolingSupervisor>,
    pub shell: RequestLoop<KernelSession>,
    pub rx: OutboxReceivers,
    pub shutdown: ShutdownTrigger,
    _requests: mpsc::Sender<Request>,
}

impl ShellHarness {
    pub async fn started(config: KernelConfig, mock: MockTooling) -> Self {
        let harness = Self::stopped(config, mock);
        harness.supervisor.start().await.expect("mock tooling starts");
        harness
    }

    /// Harness whose tooling has never been started.
    pub fn stopped(config: KernelConfig, mock: MockTooling) -> Self {
        let config = Arc::new(config);
        let (outbox, rx) = Outbox::channel(64);
        let supervisor = ToolingSupervisor::new(mock.factory(), config.dispose_timeout);
        let shutdown = ShutdownTrigger::new();
        let session = KernelSession::new(
            Arc::clone(&config),
            Arc::clone(&supervisor),
            outbox,
            shutdown.clone(),
        );
        let (requests, requests_rx) = mpsc::channel(8);
        let shell = RequestLoop::new(
            "shell",
            session,
            shell_router(),
            requests_rx,
            shutdown.subscribe(),
        );
        Self {
            mock,
            supervisor,
            shell,
            rx,
            shutdown,
            _requests: requests,
        }
    }

    /// Process one request; returns (shell replies, iopub traffic).
    pub async fn send(&mut self, request: Request) -> (Vec<WireMessage>, Vec<WireMessage>) {
        let (outcome, replies, iopub) = self.try_send(request).await;
        outcome.expect("request handled");
        (replies, iopub)
    }

    /// Like `send`, but hands back the handler outcome instead of asserting it.
    pub async fn try_send(
        &mut self,
        request: Request,
    ) -> (Result<(), KernelError>, Vec<WireMessage>, Vec<WireMessage>) {
        let outcome = self.shell.process(request).await;
        (outcome, drain(&mut self.rx.shell), drain(&mut self.rx.iopub))
    }

    pub async fn execute(&mut self, code: &str) -> (Vec<WireMessage>, Vec<WireMessage>) {
        self.send(request("execute_request", serde_json::json!({ "code": code })))
            .await
    }
}

/// Shell and control loops running as tasks, fed through their queues the
/// way the channel tasks feed them.
pub struct LiveKernel {
    pub supervisor: Arc<ToolingSupervisor>,
    pub shell_tx: mpsc::Sender<Request>,
    pub control_tx: mpsc::Sender<Request>,
    pub rx: OutboxReceivers,
    pub shutdown: ShutdownTrigger,
}

impl LiveKernel {
    pub async fn start(config: KernelConfig, mock: &MockTooling) -> Self {
        let config = Arc::new(config);
        let (outbox, rx) = Outbox::channel(64);
        let supervisor = ToolingSupervisor::new(mock.factory(), config.dispose_timeout);
        supervisor.start().await.expect("mock tooling starts");
        let shutdown = ShutdownTrigger::new();

        let (shell_tx, shell_rx) = mpsc::channel(8);
        let session = KernelSession::new(
            Arc::clone(&config),
            Arc::clone(&supervisor),
            outbox.clone(),
            shutdown.clone(),
        );
        let shell = RequestLoop::new(
            "shell",
            session,
            shell_router(),
            shell_rx,
            shutdown.subscribe(),
        );
        tokio::spawn(shell.run());

        let (control_tx, control_rx) = mpsc::channel(8);
        let control = RequestLoop::new(
            "control",
            ControlContext::new(config, Arc::clone(&supervisor), outbox, shutdown.clone()),
            control_router(),
            control_rx,
            shutdown.subscribe(),
        );
        tokio::spawn(control.run());

        Self {
            supervisor,
            shell_tx,
            control_tx,
            rx,
            shutdown,
        }
    }
}

/// Next queued message, failing the test if none arrives within five seconds.
pub async fn next(rx: &mut mpsc::Receiver<WireMessage>) -> WireMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message arrives in time")
        .expect("queue open")
}

pub fn fast_config() -> KernelConfig {
    KernelConfig {
        dispose_timeout: Duration::from_millis(100),
        shutdown_linger: Duration::from_millis(10),
        ..KernelConfig::default()
    }
}
