//! Assembles channels, tooling supervisor and request loops into a running kernel.

use std::sync::Arc;
use std::time::Duration;

use nbk_protocol::{ConnectionInfo, Signer};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::channels::{ChannelEndpoints, ChannelSet};
use crate::config::KernelConfig;
use crate::control::ControlContext;
use crate::daemon::RequestLoop;
use crate::error::{KernelError, ToolingError};
use crate::handlers::{control_router, shell_router};
use crate::lifecycle::KernelLifecycleState;
use crate::outbox::Outbox;
use crate::session::KernelSession;
use crate::tooling::{ToolingFactory, ToolingSupervisor};

/// Process-wide "please exit" signal.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: broadcast::Sender<()>,
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn fire(&self) {
        let _ = self.tx.send(());
    }

    /// Fire once `delay` has elapsed, giving queued replies time to flush.
    pub fn fire_after(&self, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(());
        });
    }
}

/// Cheap handle for signal handlers and embedders.
#[derive(Clone)]
pub struct KernelHandle {
    supervisor: Arc<ToolingSupervisor>,
    shutdown: ShutdownTrigger,
}

impl KernelHandle {
    pub async fn restart(&self) -> Result<u64, ToolingError> {
        self.supervisor.restart().await
    }

    pub fn shutdown(&self) {
        self.shutdown.fire();
    }

    pub fn state(&self) -> KernelLifecycleState {
        self.supervisor.state()
    }
}

pub struct KernelRuntime {
    channels: ChannelSet,
    supervisor: Arc<ToolingSupervisor>,
    shutdown: ShutdownTrigger,
    shutdown_rx: broadcast::Receiver<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl KernelRuntime {
    /// Bind the endpoints named in `connection` and start serving.
    pub async fn start(
        config: KernelConfig,
        connection: &ConnectionInfo,
        factory: Arc<dyn ToolingFactory>,
    ) -> Result<Self, KernelError> {
        let signer = connection.signer()?;
        let endpoints = ChannelEndpoints::from_connection(connection);
        Self::start_with(config, &endpoints, signer, factory).await
    }

    pub async fn start_with(
        config: KernelConfig,
        endpoints: &ChannelEndpoints,
        signer: Signer,
        factory: Arc<dyn ToolingFactory>,
    ) -> Result<Self, KernelError> {
        let config = Arc::new(config);
        let (outbox, outbox_rx) = Outbox::channel(config.channel_capacity);
        let (channels, inbound) =
            ChannelSet::bind(endpoints, signer, outbox_rx, config.channel_capacity).await?;

        let supervisor = ToolingSupervisor::new(factory, config.dispose_timeout);
        let shutdown = ShutdownTrigger::new();
        let shutdown_rx = shutdown.subscribe();

        let control = RequestLoop::new(
            "control",
            ControlContext::new(
                Arc::clone(&config),
                Arc::clone(&supervisor),
                outbox.clone(),
                shutdown.clone(),
            ),
            control_router(),
            inbound.control,
            shutdown.subscribe(),
        );
        let shell = RequestLoop::new(
            "shell",
            KernelSession::new(
                Arc::clone(&config),
                Arc::clone(&supervisor),
                outbox,
                shutdown.clone(),
            ),
            shell_router(),
            inbound.shell,
            shutdown.subscribe(),
        );
        let mut tasks = vec![tokio::spawn(async move {
            control.run().await;
        })];

        // Shell requests queue up until the first tooling session is ready.
        if let Err(err) = supervisor.start().await {
            tracing::error!("kernel started without tooling: {err}");
        }
        tasks.push(tokio::spawn(async move {
            shell.run().await;
        }));

        tracing::info!(
            shell = %channels.endpoints().shell,
            iopub = %channels.endpoints().iopub,
            "kernel ready"
        );
        Ok(Self {
            channels,
            supervisor,
            shutdown,
            shutdown_rx,
            tasks,
        })
    }

    pub fn handle(&self) -> KernelHandle {
        KernelHandle {
            supervisor: Arc::clone(&self.supervisor),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn endpoints(&self) -> &ChannelEndpoints {
        self.channels.endpoints()
    }

    /// Wait for a shutdown request, then tear everything down.
    pub async fn wait(mut self) {
        let _ = self.shutdown_rx.recv().await;
        tracing::info!("kernel shutting down");
        self.channels.close().await;
        self.supervisor.stop().await;
        // a loop stuck in a long execute has nothing left to answer
        for task in self.tasks {
            task.abort();
            match task.await {
                Err(err) if !err.is_cancelled() => {
                    tracing::warn!("request loop ended abnormally: {err}");
                }
                _ => {}
            }
        }
        tracing::info!("kernel stopped");
    }
}
