//! The four bound transport endpoints and the tasks that pump them.
//!
//! - heartbeat: REP socket echoing every frame verbatim
//! - shell / control: ROUTER sockets; inbound frames are verified, decoded and
//!   queued as [`Request`]s, outbound replies are signed and sent
//! - iopub: PUB socket for broadcasts
//!
//! Handlers never see a socket; they talk to the [`Outbox`](crate::outbox::Outbox).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use nbk_protocol::{ConnectionInfo, ProtocolError, Request, Signer, WireMessage, wire};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use zeromq::{PubSocket, RepSocket, RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::outbox::OutboxReceivers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Heartbeat,
    Shell,
    Control,
    IoPub,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelKind::Heartbeat => "heartbeat",
            ChannelKind::Shell => "shell",
            ChannelKind::Control => "control",
            ChannelKind::IoPub => "iopub",
        })
    }
}

/// Endpoint addresses, e.g. `tcp://127.0.0.1:5555`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoints {
    pub heartbeat: String,
    pub shell: String,
    pub control: String,
    pub iopub: String,
}

impl ChannelEndpoints {
    pub fn from_connection(info: &ConnectionInfo) -> Self {
        Self {
            heartbeat: info.endpoint(info.hb_port),
            shell: info.endpoint(info.shell_port),
            control: info.endpoint(info.control_port),
            iopub: info.endpoint(info.iopub_port),
        }
    }

    /// Loopback endpoints on OS-assigned ports.
    pub fn loopback() -> Self {
        let any = "tcp://127.0.0.1:0".to_string();
        Self {
            heartbeat: any.clone(),
            shell: any.clone(),
            control: any.clone(),
            iopub: any,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BindFailure {
    pub channel: ChannelKind,
    pub endpoint: String,
    pub reason: String,
}

/// Every channel that failed to bind; the ones that did bind were released.
#[derive(Debug, Clone)]
pub struct ChannelBindError {
    pub failures: Vec<BindFailure>,
}

impl fmt::Display for ChannelBindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to bind kernel channels:")?;
        for failure in &self.failures {
            write!(
                f,
                " {} on {} ({});",
                failure.channel, failure.endpoint, failure.reason
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for ChannelBindError {}

/// Requests decoded from the shell and control sockets.
#[derive(Debug)]
pub struct Inbound {
    pub shell: mpsc::Receiver<Request>,
    pub control: mpsc::Receiver<Request>,
}

pub struct ChannelSet {
    endpoints: ChannelEndpoints,
    shutdown: broadcast::Sender<()>,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelSet {
    /// Bind all four endpoints and start serving them.
    ///
    /// All-or-nothing: if any endpoint fails, every socket bound so far is
    /// closed and the error lists each failure.
    pub async fn bind(
        endpoints: &ChannelEndpoints,
        signer: Signer,
        outbox: OutboxReceivers,
        capacity: usize,
    ) -> Result<(Self, Inbound), ChannelBindError> {
        let mut failures = Vec::new();
        let heartbeat = bind_socket(
            RepSocket::new(),
            ChannelKind::Heartbeat,
            &endpoints.heartbeat,
            &mut failures,
        )
        .await;
        let shell = bind_socket(
            RouterSocket::new(),
            ChannelKind::Shell,
            &endpoints.shell,
            &mut failures,
        )
        .await;
        let control = bind_socket(
            RouterSocket::new(),
            ChannelKind::Control,
            &endpoints.control,
            &mut failures,
        )
        .await;
        let iopub = bind_socket(
            PubSocket::new(),
            ChannelKind::IoPub,
            &endpoints.iopub,
            &mut failures,
        )
        .await;

        let (heartbeat, shell, control, iopub) = match (heartbeat, shell, control, iopub) {
            (Some(heartbeat), Some(shell), Some(control), Some(iopub)) => {
                (heartbeat, shell, control, iopub)
            }
            (heartbeat, shell, control, iopub) => {
                release(heartbeat, ChannelKind::Heartbeat).await;
                release(shell, ChannelKind::Shell).await;
                release(control, ChannelKind::Control).await;
                release(iopub, ChannelKind::IoPub).await;
                return Err(ChannelBindError { failures });
            }
        };

        let bound = ChannelEndpoints {
            heartbeat: heartbeat.1,
            shell: shell.1,
            control: control.1,
            iopub: iopub.1,
        };
        let (shutdown, _) = broadcast::channel(1);
        let (shell_tx, shell_rx) = mpsc::channel(capacity);
        let (control_tx, control_rx) = mpsc::channel(capacity);

        let tasks = vec![
            tokio::spawn(heartbeat_loop(heartbeat.0, shutdown.subscribe())),
            tokio::spawn(router_loop(
                ChannelKind::Shell,
                shell.0,
                signer.clone(),
                shell_tx,
                outbox.shell,
                shutdown.subscribe(),
            )),
            tokio::spawn(router_loop(
                ChannelKind::Control,
                control.0,
                signer.clone(),
                control_tx,
                outbox.control,
                shutdown.subscribe(),
            )),
            tokio::spawn(pub_loop(iopub.0, signer, outbox.iopub, shutdown.subscribe())),
        ];

        let channels = Self {
            endpoints: bound,
            shutdown,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(tasks),
        };
        let inbound = Inbound {
            shell: shell_rx,
            control: control_rx,
        };
        Ok((channels, inbound))
    }

    /// The endpoints actually bound, with OS-assigned ports resolved.
    pub fn endpoints(&self) -> &ChannelEndpoints {
        &self.endpoints
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flush queued outbound messages, then close every socket. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("channels already closed");
            return;
        }
        let _ = self.shutdown.send(());
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!("channel task ended abnormally: {err}");
            }
        }
        tracing::info!("kernel channels closed");
    }
}

async fn bind_socket<S: Socket>(
    mut socket: S,
    channel: ChannelKind,
    endpoint: &str,
    failures: &mut Vec<BindFailure>,
) -> Option<(S, String)> {
    match socket.bind(endpoint).await {
        Ok(bound) => {
            tracing::info!(%channel, endpoint = %bound, "channel bound");
            Some((socket, bound.to_string()))
        }
        Err(err) => {
            tracing::error!(%channel, endpoint, "bind failed: {err}");
            failures.push(BindFailure {
                channel,
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            });
            None
        }
    }
}

async fn release<S: Socket>(bound: Option<(S, String)>, channel: ChannelKind) {
    if let Some((socket, _)) = bound {
        close_socket(socket, channel).await;
    }
}

async fn close_socket<S: Socket>(socket: S, channel: ChannelKind) {
    for err in socket.close().await {
        tracing::debug!(%channel, "error while closing socket: {err}");
    }
}

async fn heartbeat_loop(mut socket: RepSocket, mut shutdown: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            ping = socket.recv() => match ping {
                Ok(ping) => {
                    if let Err(err) = socket.send(ping).await {
                        tracing::debug!("heartbeat echo failed: {err}");
                    }
                }
                Err(err) => tracing::debug!("heartbeat receive failed: {err}"),
            },
        }
    }
    close_socket(socket, ChannelKind::Heartbeat).await;
}

async fn router_loop(
    channel: ChannelKind,
    mut socket: RouterSocket,
    signer: Signer,
    inbound: mpsc::Sender<Request>,
    mut outbound: mpsc::Receiver<WireMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            Some(message) = outbound.recv() => {
                send_wire(&mut socket, channel, &signer, message).await;
            }
            frames = socket.recv() => match frames {
                Ok(frames) => match decode_request(frames, &signer) {
                    Ok(request) => {
                        tracing::debug!(
                            %channel,
                            msg_type = request.msg_type(),
                            msg_id = request.msg_id(),
                            "request received"
                        );
                        if inbound.send(request).await.is_err() {
                            tracing::debug!(%channel, "request queue closed; dropping request");
                        }
                    }
                    Err(err) => tracing::warn!(%channel, "dropping inbound message: {err}"),
                },
                Err(err) => tracing::debug!(%channel, "receive failed: {err}"),
            },
        }
    }
    drain(&mut socket, channel, &signer, &mut outbound).await;
    close_socket(socket, channel).await;
}

async fn pub_loop(
    mut socket: PubSocket,
    signer: Signer,
    mut outbound: mpsc::Receiver<WireMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            message = outbound.recv() => match message {
                Some(message) => send_wire(&mut socket, ChannelKind::IoPub, &signer, message).await,
                None => break,
            },
        }
    }
    drain(&mut socket, ChannelKind::IoPub, &signer, &mut outbound).await;
    close_socket(socket, ChannelKind::IoPub).await;
}

/// Send whatever was queued before shutdown.
async fn drain<S: SocketSend>(
    socket: &mut S,
    channel: ChannelKind,
    signer: &Signer,
    outbound: &mut mpsc::Receiver<WireMessage>,
) {
    outbound.close();
    while let Ok(message) = outbound.try_recv() {
        send_wire(socket, channel, signer, message).await;
    }
}

fn decode_request(frames: ZmqMessage, signer: &Signer) -> Result<Request, ProtocolError> {
    let message = wire::decode(frames.into_vec(), signer)?;
    Request::from_wire(message)
}

async fn send_wire<S: SocketSend>(
    socket: &mut S,
    channel: ChannelKind,
    signer: &Signer,
    message: WireMessage,
) {
    let msg_type = message.header.msg_type.clone();
    let frames = match wire::encode(&message, signer) {
        Ok(frames) => frames,
        Err(err) => {
            tracing::error!(%channel, msg_type = %msg_type, "failed to frame message: {err}");
            return;
        }
    };
    let frames = match ZmqMessage::try_from(frames) {
        Ok(frames) => frames,
        Err(err) => {
            tracing::error!(%channel, msg_type = %msg_type, "failed to frame message: {err}");
            return;
        }
    };
    match socket.send(frames).await {
        Ok(()) => tracing::trace!(%channel, msg_type = %msg_type, "message sent"),
        Err(err) => tracing::warn!(%channel, msg_type = %msg_type, "send failed: {err}"),
    }
}
