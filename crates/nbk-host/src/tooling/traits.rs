use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::cells::Cell;
use crate::error::ToolingError;
use crate::token::TokenSpan;

/// Output of a successful compile, handed back to [`ToolingClient::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub sequence: i64,
    pub module_id: String,
    pub path: Option<PathBuf>,
}

/// Mime-keyed render payload for `execute_result`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutput {
    pub data: Map<String, Value>,
}

impl RenderOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::default().with("text/plain", text.into())
    }

    pub fn with(mut self, mime: &str, value: impl Into<Value>) -> Self {
        self.data.insert(mime.to_string(), value.into());
        self
    }
}

/// One live language-tooling session (compiler daemon, IDE server, ...).
#[async_trait]
pub trait ToolingClient: Send + Sync {
    async fn compile(&self, cell: &Cell) -> Result<Artifact, ToolingError>;
    async fn run(&self, artifact: &Artifact) -> Result<RenderOutput, ToolingError>;
    async fn complete(&self, cell: &Cell, span: &TokenSpan) -> Result<Vec<String>, ToolingError>;
    async fn inspect(&self, cell: &Cell, span: &TokenSpan)
    -> Result<Option<String>, ToolingError>;
    /// Graceful release of the session's resources.
    async fn dispose(&self) -> Result<(), ToolingError>;
    /// Forced release after `dispose` failed or overran its bound.
    async fn kill(&self) {}
}

/// Starts fresh tooling sessions.
#[async_trait]
pub trait ToolingFactory: Send + Sync {
    async fn start(&self) -> Result<Arc<dyn ToolingClient>, ToolingError>;
}
