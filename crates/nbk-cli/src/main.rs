use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nbk_host::tooling::CommandToolingFactory;
use nbk_host::{KernelConfig, KernelHandle, KernelRuntime, ToolingProfile};
use nbk_protocol::ConnectionInfo;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nbk", version, about = "Notebook kernel for command-driven tooling")]
struct Cli {
    /// Directory the tooling resolves sources and dependencies against
    working_dir: PathBuf,

    /// Connection file written by the notebook front-end
    connection_file: PathBuf,

    /// Tooling profile (JSON); defaults to the POSIX shell profile
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Log filter, e.g. `info` or `nbk_host=debug`
    #[arg(long, env = "NBK_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log);

    let connection = ConnectionInfo::from_file(&cli.connection_file)
        .with_context(|| format!("load connection file {}", cli.connection_file.display()))?;
    let profile = match &cli.profile {
        Some(path) => ToolingProfile::from_file(path)?,
        None => ToolingProfile::default(),
    };

    let working_dir = cli
        .working_dir
        .canonicalize()
        .with_context(|| format!("resolve working directory {}", cli.working_dir.display()))?;
    let mut config = KernelConfig::from_env(&working_dir);
    config.apply_profile(&profile)?;

    let factory = Arc::new(CommandToolingFactory::new(profile, &working_dir));
    let runtime = KernelRuntime::start(config, &connection, factory)
        .await
        .context("start kernel")?;

    tokio::spawn(handle_signals(runtime.handle()));
    runtime.wait().await;
    Ok(())
}

fn setup_logging(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}

/// SIGINT restarts the tooling session; SIGTERM shuts the kernel down.
async fn handle_signals(handle: KernelHandle) {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    tracing::error!("failed to listen for interrupts: {err}");
                    return;
                }
                tracing::info!("interrupt received, restarting tooling");
                if let Err(err) = handle.restart().await {
                    tracing::error!("restart failed: {err}");
                }
            }
            _ = async {
                match term.as_mut() {
                    Some(term) => { term.recv().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                tracing::info!("SIGTERM received, shutting down");
                handle.shutdown();
                return;
            }
        }
    }
}
