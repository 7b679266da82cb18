//! Owns the live tooling session and drives the kernel lifecycle around it.
//!
//! Restarts are coalesced: while one restart is in flight every other caller
//! joins it and observes the same outcome. Each successful (re)start bumps a
//! generation counter so request handlers can tell that their session state
//! belongs to a dead tooling session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::watch;

use super::traits::{ToolingClient, ToolingFactory};
use crate::error::ToolingError;
use crate::lifecycle::{KernelLifecycleState, Lifecycle};

type RestartFuture = Shared<BoxFuture<'static, Result<u64, ToolingError>>>;

#[derive(Default)]
struct ActiveSession {
    client: Option<Arc<dyn ToolingClient>>,
    generation: u64,
}

pub struct ToolingSupervisor {
    factory: Arc<dyn ToolingFactory>,
    lifecycle: Lifecycle,
    dispose_timeout: Duration,
    session: Mutex<ActiveSession>,
    pending: Mutex<Option<RestartFuture>>,
}

impl ToolingSupervisor {
    pub fn new(factory: Arc<dyn ToolingFactory>, dispose_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            factory,
            lifecycle: Lifecycle::new(),
            dispose_timeout,
            session: Mutex::new(ActiveSession::default()),
            pending: Mutex::new(None),
        })
    }

    pub fn state(&self) -> KernelLifecycleState {
        self.lifecycle.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<KernelLifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Generation of the most recently started session; 0 before the first start.
    pub fn generation(&self) -> u64 {
        self.lock_session().generation
    }

    /// The live client and its generation. Fails unless the kernel is `Running`.
    pub fn client(&self) -> Result<(Arc<dyn ToolingClient>, u64), ToolingError> {
        let session = self.lock_session();
        if self.lifecycle.current() != KernelLifecycleState::Running {
            return Err(ToolingError::NotRunning);
        }
        let client = session.client.clone().ok_or(ToolingError::NotRunning)?;
        Ok((client, session.generation))
    }

    pub async fn start(self: &Arc<Self>) -> Result<u64, ToolingError> {
        self.restart().await
    }

    /// Replace the tooling session. Concurrent callers share one restart.
    pub async fn restart(self: &Arc<Self>) -> Result<u64, ToolingError> {
        let inflight = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.as_ref() {
                Some(inflight) => {
                    tracing::debug!("restart already in flight; joining it");
                    inflight.clone()
                }
                None => {
                    let this = Arc::clone(self);
                    let task = tokio::spawn(async move {
                        let outcome = this.replace_session().await;
                        this.pending
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .take();
                        outcome
                    });
                    let shared = async move {
                        task.await.unwrap_or_else(|err| {
                            Err(ToolingError::Start(format!("restart task failed: {err}")))
                        })
                    }
                    .boxed()
                    .shared();
                    *pending = Some(shared.clone());
                    shared
                }
            }
        };
        inflight.await
    }

    /// Dispose the live session, if any, and move to `Stopped`. Idempotent.
    pub async fn stop(&self) {
        let client = {
            let mut session = self.lock_session();
            if self.lifecycle.current() != KernelLifecycleState::Stopped {
                if let Err(err) = self.lifecycle.transition(KernelLifecycleState::Stopped) {
                    tracing::debug!("stop: {err}");
                }
            }
            session.client.take()
        };
        match client {
            Some(client) => {
                tracing::info!("stopping tooling session");
                self.dispose(client).await;
            }
            None => tracing::debug!("stop requested with no live tooling session"),
        }
    }

    async fn replace_session(&self) -> Result<u64, ToolingError> {
        let target = match self.lifecycle.current() {
            KernelLifecycleState::Uninitialized => KernelLifecycleState::Starting,
            _ => KernelLifecycleState::Restarting,
        };
        self.lifecycle.transition(target)?;

        let previous = self.lock_session().client.take();
        if let Some(previous) = previous {
            tracing::info!("disposing previous tooling session");
            self.dispose(previous).await;
        }

        let client = match self.factory.start().await {
            Ok(client) => client,
            Err(err) => {
                tracing::error!("tooling session failed to start: {err}");
                let _ = self.lifecycle.transition(KernelLifecycleState::Stopped);
                return Err(err);
            }
        };

        let installed = {
            let mut session = self.lock_session();
            if self.lifecycle.current() == target {
                session.client = Some(Arc::clone(&client));
                session.generation += 1;
                self.lifecycle.transition(KernelLifecycleState::Running)?;
                Some(session.generation)
            } else {
                None
            }
        };
        match installed {
            Some(generation) => {
                tracing::info!(generation, "tooling session ready");
                Ok(generation)
            }
            None => {
                tracing::warn!("kernel stopped while the tooling session was starting");
                self.dispose(client).await;
                Err(ToolingError::NotRunning)
            }
        }
    }

    async fn dispose(&self, client: Arc<dyn ToolingClient>) {
        match tokio::time::timeout(self.dispose_timeout, client.dispose()).await {
            Ok(Ok(())) => tracing::debug!("tooling session disposed"),
            Ok(Err(err)) => {
                tracing::warn!("tooling dispose failed: {err}; killing it");
                client.kill().await;
            }
            Err(_) => {
                let err = ToolingError::DisposeTimeout(self.dispose_timeout);
                tracing::warn!("{err}; killing it");
                client.kill().await;
            }
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, ActiveSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
