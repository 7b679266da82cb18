//! Scriptable in-memory tooling for tests.
//!
//! Every client started by a [`MockTooling`] factory shares one script, so a
//! test can change behavior mid-run and inspect what the kernel asked for.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{Artifact, RenderOutput, ToolingClient, ToolingFactory};
use crate::cells::Cell;
use crate::error::ToolingError;
use crate::token::TokenSpan;

struct Script {
    start_error: Option<String>,
    start_delay: Duration,
    compile_delay: Duration,
    compile_error: Option<String>,
    compile_panic: Option<String>,
    run_result: Result<RenderOutput, String>,
    completions: Result<Vec<String>, String>,
    inspection: Result<Option<String>, String>,
    dispose_hangs: bool,
    compiled: Vec<Cell>,
    completed: Vec<(Cell, TokenSpan)>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            start_error: None,
            start_delay: Duration::ZERO,
            compile_delay: Duration::ZERO,
            compile_error: None,
            compile_panic: None,
            run_result: Ok(RenderOutput::text("ok")),
            completions: Ok(Vec::new()),
            inspection: Ok(None),
            dispose_hangs: false,
            compiled: Vec::new(),
            completed: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    starts: AtomicUsize,
    disposals: AtomicUsize,
    kills: AtomicUsize,
}

impl Shared {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Default)]
pub struct MockTooling {
    shared: Arc<Shared>,
}

impl MockTooling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> Arc<dyn ToolingFactory> {
        Arc::new(self.clone())
    }

    pub fn fail_start(&self, message: &str) {
        self.shared.script().start_error = Some(message.to_string());
    }

    pub fn set_start_delay(&self, delay: Duration) {
        self.shared.script().start_delay = delay;
    }

    /// Make every compile take `delay`, standing in for a slow compiler.
    pub fn set_compile_delay(&self, delay: Duration) {
        self.shared.script().compile_delay = delay;
    }

    /// Make compiling user cells panic, as a buggy backend would.
    pub fn panic_on_compile(&self, message: &str) {
        self.shared.script().compile_panic = Some(message.to_string());
    }

    pub fn fail_compile(&self, message: &str) {
        self.shared.script().compile_error = Some(message.to_string());
    }

    pub fn set_run_output(&self, output: RenderOutput) {
        self.shared.script().run_result = Ok(output);
    }

    pub fn fail_run(&self, message: &str) {
        self.shared.script().run_result = Err(message.to_string());
    }

    /// Undo `fail_compile`, `panic_on_compile` and `fail_run`.
    pub fn clear_failures(&self) {
        let mut script = self.shared.script();
        script.compile_error = None;
        script.compile_panic = None;
        script.run_result = Ok(RenderOutput::text("ok"));
    }

    pub fn set_completions(&self, completions: Result<Vec<String>, String>) {
        self.shared.script().completions = completions;
    }

    pub fn set_inspection(&self, inspection: Result<Option<String>, String>) {
        self.shared.script().inspection = inspection;
    }

    pub fn hang_on_dispose(&self) {
        self.shared.script().dispose_hangs = true;
    }

    pub fn starts(&self) -> usize {
        self.shared.starts.load(Ordering::SeqCst)
    }

    pub fn disposals(&self) -> usize {
        self.shared.disposals.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.shared.kills.load(Ordering::SeqCst)
    }

    /// Cells compiled so far, setup cells included.
    pub fn compiled(&self) -> Vec<Cell> {
        self.shared.script().compiled.clone()
    }

    pub fn completed(&self) -> Vec<(Cell, TokenSpan)> {
        self.shared.script().completed.clone()
    }
}

#[async_trait]
impl ToolingFactory for MockTooling {
    async fn start(&self) -> Result<Arc<dyn ToolingClient>, ToolingError> {
        let (delay, error) = {
            let script = self.shared.script();
            (script.start_delay, script.start_error.clone())
        };
        self.shared.starts.fetch_add(1, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = error {
            return Err(ToolingError::Start(message));
        }
        Ok(Arc::new(MockClient {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MockClient {
    shared: Arc<Shared>,
}

#[async_trait]
impl ToolingClient for MockClient {
    async fn compile(&self, cell: &Cell) -> Result<Artifact, ToolingError> {
        let (delay, error, panic) = {
            let mut script = self.shared.script();
            script.compiled.push(cell.clone());
            let user_cell = !cell.is_setup();
            (
                script.compile_delay,
                script.compile_error.clone().filter(|_| user_cell),
                script.compile_panic.clone().filter(|_| user_cell),
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = panic {
            panic!("{message}");
        }
        if let Some(message) = error {
            return Err(ToolingError::Compile(message));
        }
        let module_id = cell
            .module_id
            .clone()
            .ok_or(ToolingError::MissingModule(cell.sequence))?;
        Ok(Artifact {
            sequence: cell.sequence,
            module_id,
            path: None,
        })
    }

    async fn run(&self, _artifact: &Artifact) -> Result<RenderOutput, ToolingError> {
        self.shared
            .script()
            .run_result
            .clone()
            .map_err(ToolingError::Run)
    }

    async fn complete(&self, cell: &Cell, span: &TokenSpan) -> Result<Vec<String>, ToolingError> {
        let mut script = self.shared.script();
        script.completed.push((cell.clone(), *span));
        script
            .completions
            .clone()
            .map_err(ToolingError::Unavailable)
    }

    async fn inspect(
        &self,
        _cell: &Cell,
        _span: &TokenSpan,
    ) -> Result<Option<String>, ToolingError> {
        self.shared
            .script()
            .inspection
            .clone()
            .map_err(ToolingError::Unavailable)
    }

    async fn dispose(&self) -> Result<(), ToolingError> {
        self.shared.disposals.fetch_add(1, Ordering::SeqCst);
        let hangs = self.shared.script().dispose_hangs;
        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn kill(&self) {
        self.shared.kills.fetch_add(1, Ordering::SeqCst);
    }
}
