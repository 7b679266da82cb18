use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use nbk_protocol::LanguageInfo;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Directory the tooling resolves dependencies against.
    pub working_dir: PathBuf,
    /// Grace period for a tooling session to exit before it is killed.
    pub dispose_timeout: Duration,
    /// Delay between a final shutdown reply and closing the channels.
    pub shutdown_linger: Duration,
    /// Capacity of the inbound shell/control queues and outbound queues.
    pub channel_capacity: usize,
    pub module_naming: ModuleNaming,
    /// Source of the setup cell built once per tooling session.
    pub setup_source: String,
    pub language: LanguageInfo,
    pub banner: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        let profile = ToolingProfile::default();
        Self {
            working_dir: PathBuf::from("."),
            dispose_timeout: Duration::from_secs(10),
            shutdown_linger: Duration::from_millis(50),
            channel_capacity: 128,
            module_naming: ModuleNaming::default(),
            setup_source: profile.setup_source,
            language: profile.language,
            banner: format!("nbk {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl KernelConfig {
    /// Defaults with `NBK_*` environment overrides applied.
    pub fn from_env(working_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self {
            working_dir: working_dir.into(),
            ..Self::default()
        };
        if let Some(ms) = env_millis("NBK_DISPOSE_TIMEOUT_MS") {
            config.dispose_timeout = ms;
        }
        if let Some(ms) = env_millis("NBK_SHUTDOWN_LINGER_MS") {
            config.shutdown_linger = ms;
        }
        config
    }

    /// Adopt the language metadata, naming rule and setup cell of a tooling profile.
    pub fn apply_profile(&mut self, profile: &ToolingProfile) -> Result<()> {
        self.language = profile.language.clone();
        self.setup_source = profile.setup_source.clone();
        if let Some(pattern) = &profile.module_pattern {
            self.module_naming = ModuleNaming::declared(pattern)
                .with_context(|| format!("invalid module pattern '{pattern}'"))?;
        }
        Ok(())
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(err) => {
            tracing::warn!(var, value = %raw, "ignoring invalid duration: {err}");
            None
        }
    }
}

/// How a cell's module identity is derived from its source.
#[derive(Debug, Clone)]
pub enum ModuleNaming {
    /// `<prefix><sequence>`; every cell is addressable.
    Sequential { prefix: String },
    /// First capture group of `pattern`; cells without a declaration have no module.
    Declared { pattern: Regex },
}

impl Default for ModuleNaming {
    fn default() -> Self {
        ModuleNaming::Sequential {
            prefix: "Cell".into(),
        }
    }
}

impl ModuleNaming {
    pub fn declared(pattern: &str) -> Result<Self, regex::Error> {
        Ok(ModuleNaming::Declared {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn module_id(&self, sequence: i64, source: &str) -> Option<String> {
        match self {
            ModuleNaming::Sequential { prefix } if sequence < 0 => Some(format!("{prefix}Setup")),
            ModuleNaming::Sequential { prefix } => Some(format!("{prefix}{sequence}")),
            ModuleNaming::Declared { pattern } => pattern
                .captures(source)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
        }
    }
}

/// Description of a command-driven tooling backend.
///
/// Each command is an argv template. Placeholders: `{file}`, `{module}`,
/// `{project}`, `{workdir}`, `{prefix}`, `{token}`, `{cursor}`, and `{port}`
/// when a server is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolingProfile {
    pub language: LanguageInfo,
    /// Regex whose first group names the module declared by a cell.
    #[serde(default)]
    pub module_pattern: Option<String>,
    #[serde(default)]
    pub setup_source: String,
    /// Empty means cells need no compile step beyond being written out.
    #[serde(default)]
    pub compile: Vec<String>,
    pub run: Vec<String>,
    /// Prints one completion per line.
    #[serde(default)]
    pub complete: Option<Vec<String>>,
    /// Prints details for the token; empty output means not found.
    #[serde(default)]
    pub inspect: Option<Vec<String>>,
    /// Long-lived helper process owned by each tooling session, e.g. an IDE
    /// server listening on `{port}`. Complete and inspect commands address it
    /// through the same placeholder.
    #[serde(default)]
    pub server: Option<Vec<String>>,
}

impl Default for ToolingProfile {
    fn default() -> Self {
        let argv = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            language: LanguageInfo {
                name: "sh".into(),
                version: String::new(),
                file_extension: ".sh".into(),
                mimetype: "text/x-sh".into(),
            },
            module_pattern: None,
            setup_source: String::new(),
            compile: argv(&["sh", "-n", "{file}"]),
            run: argv(&["sh", "{file}"]),
            complete: Some(argv(&[
                "bash",
                "-c",
                "compgen -c -- \"$0\" | sort -u | head -n 20",
                "{prefix}",
            ])),
            inspect: Some(argv(&["sh", "-c", "command -V \"$0\"", "{token}"])),
            server: None,
        }
    }
}

impl ToolingProfile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read tooling profile {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parse tooling profile {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_names_cells_and_setup() {
        let naming = ModuleNaming::default();
        assert_eq!(naming.module_id(0, "let x = 1").as_deref(), Some("Cell0"));
        assert_eq!(naming.module_id(-1, "").as_deref(), Some("CellSetup"));
    }

    #[test]
    fn declared_requires_a_declaration() {
        let naming = ModuleNaming::declared(r"(?m)^module ([^\s]+) where").unwrap();
        assert_eq!(
            naming.module_id(4, "module Main where\nmain = 1").as_deref(),
            Some("Main")
        );
        assert_eq!(naming.module_id(5, "main = 1"), None);
    }

    #[test]
    fn profile_overrides_language_and_naming() {
        let profile: ToolingProfile = serde_json::from_value(serde_json::json!({
            "language": { "name": "purescript", "file_extension": ".purs" },
            "module_pattern": "^module ([^\\s]+) where",
            "compile": ["purs", "compile", "{file}"],
            "run": ["node", "-e", "require('./output/{module}')"]
        }))
        .unwrap();

        let mut config = KernelConfig::default();
        config.apply_profile(&profile).unwrap();
        assert_eq!(config.language.name, "purescript");
        assert!(matches!(config.module_naming, ModuleNaming::Declared { .. }));
        assert!(profile.server.is_none());
    }

    #[test]
    fn bad_module_pattern_is_reported() {
        let profile = ToolingProfile {
            module_pattern: Some("(unclosed".into()),
            ..ToolingProfile::default()
        };
        let err = KernelConfig::default().apply_profile(&profile).unwrap_err();
        assert!(err.to_string().contains("invalid module pattern"));
    }
}
