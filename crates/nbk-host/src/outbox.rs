//! Outbound message queues shared by request handlers.
//!
//! Handlers never touch sockets. Replies and broadcasts are queued here and
//! the channel tasks sign, frame and send them.

use nbk_protocol::{KernelMessage, ProtocolError, Request, Stream, StreamName, WireMessage};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyChannel {
    Shell,
    Control,
}

#[derive(Debug, Clone)]
pub struct Outbox {
    shell: mpsc::Sender<WireMessage>,
    control: mpsc::Sender<WireMessage>,
    iopub: mpsc::Sender<WireMessage>,
}

/// Receiving ends of an [`Outbox`], drained by the channel tasks.
#[derive(Debug)]
pub struct OutboxReceivers {
    pub shell: mpsc::Receiver<WireMessage>,
    pub control: mpsc::Receiver<WireMessage>,
    pub iopub: mpsc::Receiver<WireMessage>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, OutboxReceivers) {
        let (shell, shell_rx) = mpsc::channel(capacity);
        let (control, control_rx) = mpsc::channel(capacity);
        let (iopub, iopub_rx) = mpsc::channel(capacity);
        (
            Self {
                shell,
                control,
                iopub,
            },
            OutboxReceivers {
                shell: shell_rx,
                control: control_rx,
                iopub: iopub_rx,
            },
        )
    }

    /// Reply to `request` on the channel it arrived on.
    pub async fn reply(&self, channel: ReplyChannel, request: &Request, message: KernelMessage) {
        let tx = match channel {
            ReplyChannel::Shell => &self.shell,
            ReplyChannel::Control => &self.control,
        };
        let msg_type = message.msg_type();
        enqueue(tx, msg_type, request.reply(message)).await;
    }

    /// Broadcast on iopub, parented to `request`.
    pub async fn publish(&self, request: &Request, message: KernelMessage) {
        let msg_type = message.msg_type();
        enqueue(&self.iopub, msg_type, request.broadcast(message)).await;
    }

    pub async fn stream(&self, request: &Request, name: StreamName, text: impl Into<String>) {
        let stream = Stream {
            name,
            text: text.into(),
        };
        self.publish(request, KernelMessage::Stream(stream)).await;
    }
}

async fn enqueue(
    tx: &mpsc::Sender<WireMessage>,
    msg_type: &'static str,
    message: Result<WireMessage, ProtocolError>,
) {
    match message {
        Ok(message) => {
            if tx.send(message).await.is_err() {
                tracing::debug!(msg_type, "channel closed; dropping outbound message");
            }
        }
        Err(err) => tracing::error!(msg_type, "failed to encode outbound message: {err}"),
    }
}
