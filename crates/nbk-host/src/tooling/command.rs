//! Tooling backend that shells out to profile-configured commands.
//!
//! Each session owns a scratch project directory; cells are written to
//! `<project>/src/<module><ext>` before the compile command sees them. An
//! optional long-lived server process is started with the session and
//! stopped when it is disposed. The server gets a free loopback port through
//! `{port}`, and the query commands reach it through the same placeholder.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::traits::{Artifact, RenderOutput, ToolingClient, ToolingFactory};
use crate::cells::Cell;
use crate::config::ToolingProfile;
use crate::error::ToolingError;
use crate::token::TokenSpan;

pub struct CommandToolingFactory {
    profile: ToolingProfile,
    working_dir: PathBuf,
}

impl CommandToolingFactory {
    pub fn new(profile: ToolingProfile, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile,
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl ToolingFactory for CommandToolingFactory {
    async fn start(&self) -> Result<Arc<dyn ToolingClient>, ToolingError> {
        let project = tempfile::Builder::new()
            .prefix("nbk-")
            .tempdir()
            .map_err(|err| ToolingError::Start(format!("create project dir: {err}")))?;
        tokio::fs::create_dir_all(project.path().join("src"))
            .await
            .map_err(|err| ToolingError::Start(format!("create source dir: {err}")))?;

        let port = match self.profile.server {
            Some(_) => Some(free_port().await?),
            None => None,
        };
        let mut tooling = CommandTooling {
            project,
            profile: self.profile.clone(),
            working_dir: self.working_dir.clone(),
            port,
            server: Mutex::new(None),
        };
        if let Some(template) = &self.profile.server {
            let argv = tooling.expand(template, &[]);
            let child = spawn_server(&argv, &tooling.working_dir)?;
            tracing::info!(pid = child.id(), port, "tooling server started");
            tooling.server = Mutex::new(Some(child));
        }
        tracing::debug!(project = %tooling.project.path().display(), "tooling session created");
        Ok(Arc::new(tooling))
    }
}

pub struct CommandTooling {
    project: TempDir,
    profile: ToolingProfile,
    working_dir: PathBuf,
    /// Port handed to the server, if the profile runs one.
    port: Option<u16>,
    server: Mutex<Option<Child>>,
}

impl CommandTooling {
    fn cell_path(&self, module: &str) -> PathBuf {
        let ext = self.profile.language.file_extension.trim_start_matches('.');
        let file = if ext.is_empty() {
            module.to_string()
        } else {
            format!("{module}.{ext}")
        };
        self.project.path().join("src").join(file)
    }

    /// Substitute `{name}` placeholders in an argv template.
    fn expand(&self, template: &[String], vars: &[(&str, String)]) -> Vec<String> {
        let project = self.project.path().display().to_string();
        let workdir = self.working_dir.display().to_string();
        let port = self.port.map(|port| port.to_string());
        template
            .iter()
            .map(|arg| {
                let mut arg = arg
                    .replace("{project}", &project)
                    .replace("{workdir}", &workdir);
                if let Some(port) = &port {
                    arg = arg.replace("{port}", port);
                }
                for (name, value) in vars {
                    arg = arg.replace(&format!("{{{name}}}"), value);
                }
                arg
            })
            .collect()
    }

    async fn write_cell(&self, cell: &Cell) -> Result<(String, PathBuf), ToolingError> {
        let module = cell
            .module_id
            .clone()
            .ok_or(ToolingError::MissingModule(cell.sequence))?;
        let path = self.cell_path(&module);
        tokio::fs::write(&path, &cell.source)
            .await
            .map_err(|err| ToolingError::Compile(format!("write {}: {err}", path.display())))?;
        Ok((module, path))
    }

    fn query_vars(cell: &Cell, span: &TokenSpan) -> Vec<(&'static str, String)> {
        vec![
            ("prefix", span.prefix(&cell.source).to_string()),
            ("token", span.token(&cell.source).to_string()),
            ("cursor", span.cursor.to_string()),
            ("module", cell.module_id.clone().unwrap_or_default()),
        ]
    }
}

#[async_trait]
impl ToolingClient for CommandTooling {
    async fn compile(&self, cell: &Cell) -> Result<Artifact, ToolingError> {
        let (module, path) = self.write_cell(cell).await?;
        if !self.profile.compile.is_empty() {
            let argv = self.expand(
                &self.profile.compile,
                &[
                    ("file", path.display().to_string()),
                    ("module", module.clone()),
                ],
            );
            run_command(&argv, self.project.path())
                .await
                .map_err(ToolingError::Compile)?;
        }
        Ok(Artifact {
            sequence: cell.sequence,
            module_id: module,
            path: Some(path),
        })
    }

    async fn run(&self, artifact: &Artifact) -> Result<RenderOutput, ToolingError> {
        let path = artifact
            .path
            .clone()
            .unwrap_or_else(|| self.cell_path(&artifact.module_id));
        let argv = self.expand(
            &self.profile.run,
            &[
                ("file", path.display().to_string()),
                ("module", artifact.module_id.clone()),
            ],
        );
        let stdout = run_command(&argv, &self.working_dir)
            .await
            .map_err(ToolingError::Run)?;
        Ok(RenderOutput::text(stdout))
    }

    async fn complete(&self, cell: &Cell, span: &TokenSpan) -> Result<Vec<String>, ToolingError> {
        let Some(template) = &self.profile.complete else {
            return Ok(Vec::new());
        };
        if cell.module_id.is_some() {
            self.write_cell(cell).await?;
        }
        let argv = self.expand(template, &Self::query_vars(cell, span));
        let stdout = run_command(&argv, &self.working_dir)
            .await
            .map_err(ToolingError::Unavailable)?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn inspect(
        &self,
        cell: &Cell,
        span: &TokenSpan,
    ) -> Result<Option<String>, ToolingError> {
        let Some(template) = &self.profile.inspect else {
            return Ok(None);
        };
        if span.token(&cell.source).is_empty() {
            return Ok(None);
        }
        let argv = self.expand(template, &Self::query_vars(cell, span));
        match run_command(&argv, &self.working_dir).await {
            Ok(stdout) => {
                let detail = stdout.trim();
                Ok((!detail.is_empty()).then(|| detail.to_string()))
            }
            // a failing lookup means the token is unknown to the tooling
            Err(err) => {
                tracing::debug!("inspect lookup failed: {err}");
                Ok(None)
            }
        }
    }

    async fn dispose(&self) -> Result<(), ToolingError> {
        let mut server = self.server.lock().await;
        if let Some(child) = server.as_mut() {
            drop(child.stdin.take());
            let status = child
                .wait()
                .await
                .map_err(|err| ToolingError::Unavailable(format!("wait for server: {err}")))?;
            tracing::debug!(%status, "tooling server exited");
            server.take();
        }
        Ok(())
    }

    async fn kill(&self) {
        let mut server = self.server.lock().await;
        if let Some(mut child) = server.take() {
            if let Err(err) = child.kill().await {
                tracing::warn!("failed to kill tooling server: {err}");
            }
        }
    }
}

/// Ask the OS for a loopback port nobody is listening on.
async fn free_port() -> Result<u16, ToolingError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|err| ToolingError::Start(format!("reserve server port: {err}")))?;
    let addr = listener
        .local_addr()
        .map_err(|err| ToolingError::Start(format!("reserve server port: {err}")))?;
    Ok(addr.port())
}

fn spawn_server(argv: &[String], cwd: &Path) -> Result<Child, ToolingError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(ToolingError::Start("server command is empty".into()));
    };
    Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| ToolingError::Start(format!("spawn {program}: {err}")))
}

/// Run to completion; stdout on success, a readable failure otherwise.
async fn run_command(argv: &[String], cwd: &Path) -> Result<String, String> {
    let Some((program, args)) = argv.split_first() else {
        return Err("command is empty".into());
    };
    tracing::debug!(program, ?args, "running tooling command");
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| format!("{program}: {err}"))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() {
            stdout.trim_end()
        } else {
            stderr.trim_end()
        };
        Err(format!("{program} failed ({}):\n{detail}", output.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::CellStore;
    use crate::config::ModuleNaming;

    fn shell_profile() -> ToolingProfile {
        ToolingProfile::default()
    }

    fn submitted(source: &str) -> Cell {
        let mut cells = CellStore::new(ModuleNaming::default(), "");
        cells.update(source);
        cells.submit_current()
    }

    #[tokio::test]
    async fn compiles_and_runs_a_shell_cell() {
        let workdir = tempfile::tempdir().unwrap();
        let factory = CommandToolingFactory::new(shell_profile(), workdir.path());
        let tooling = factory.start().await.unwrap();

        let artifact = tooling.compile(&submitted("echo hello")).await.unwrap();
        assert_eq!(artifact.module_id, "Cell0");
        assert!(artifact.path.as_ref().unwrap().ends_with("src/Cell0.sh"));

        let output = tooling.run(&artifact).await.unwrap();
        assert_eq!(output.data["text/plain"], "hello\n");
        tooling.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn syntax_errors_are_compile_failures() {
        let workdir = tempfile::tempdir().unwrap();
        let factory = CommandToolingFactory::new(shell_profile(), workdir.path());
        let tooling = factory.start().await.unwrap();

        let err = tooling.compile(&submitted("if then fi (")).await.unwrap_err();
        assert!(matches!(err, ToolingError::Compile(_)), "{err:?}");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_run_failure() {
        let workdir = tempfile::tempdir().unwrap();
        let factory = CommandToolingFactory::new(shell_profile(), workdir.path());
        let tooling = factory.start().await.unwrap();

        let artifact = tooling
            .compile(&submitted("echo boom >&2; exit 3"))
            .await
            .unwrap();
        let err = tooling.run(&artifact).await.unwrap_err();
        match err {
            ToolingError::Run(message) => assert!(message.contains("boom"), "{message}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_query_commands_yield_nothing() {
        let workdir = tempfile::tempdir().unwrap();
        let profile = ToolingProfile {
            complete: None,
            inspect: None,
            ..shell_profile()
        };
        let tooling = CommandToolingFactory::new(profile, workdir.path())
            .start()
            .await
            .unwrap();
        let cell = submitted("ech");
        let span = TokenSpan::scan(&cell.source, 3);
        assert!(tooling.complete(&cell, &span).await.unwrap().is_empty());
        assert_eq!(tooling.inspect(&cell, &span).await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_and_queries_share_the_session_port() {
        let workdir = tempfile::tempdir().unwrap();
        let profile = ToolingProfile {
            server: Some(vec![
                "sh".into(),
                "-c".into(),
                "echo $0 > {project}/server-port; cat".into(),
                "{port}".into(),
            ]),
            complete: Some(vec!["sh".into(), "-c".into(), "echo $0".into(), "{port}".into()]),
            ..shell_profile()
        };
        let tooling = CommandToolingFactory::new(profile, workdir.path())
            .start()
            .await
            .unwrap();
        let cell = submitted("ech");
        let span = TokenSpan::scan(&cell.source, 3);
        let matches = tooling.complete(&cell, &span).await.unwrap();
        let port: u16 = matches[0].parse().expect("port number");
        assert_ne!(port, 0);
        tooling.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn server_process_is_stopped_on_dispose() {
        let workdir = tempfile::tempdir().unwrap();
        let profile = ToolingProfile {
            server: Some(vec!["cat".into()]),
            ..shell_profile()
        };
        let tooling = CommandToolingFactory::new(profile, workdir.path())
            .start()
            .await
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), tooling.dispose())
            .await
            .expect("cat exits once stdin closes")
            .unwrap();
    }
}
