use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quill::config::{resolve_socket, AppConfig, Paths, Secrets};
use quill::ipc::host;
use quill::providers::ProviderRouter;
use quill::services::database::Database;
use quill::services::dispatcher::AppContext;
use quill::units::{scan_roots, UnitRegistry};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Assistant host daemon", long_about = None)]
struct Cli {
    /// Config file (defaults to the XDG location).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control socket path.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// SQLite database file.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let paths = Paths::resolve();

    let config_file = cli.config.unwrap_or_else(|| paths.config_file.clone());
    let config = AppConfig::load(&config_file)?;
    let secrets = Secrets::load(&paths.secrets_file)?;

    let db_file = cli.db.unwrap_or_else(|| paths.db_file.clone());
    let db = Database::open(&db_file)
        .with_context(|| format!("opening database {}", db_file.display()))?;

    let roots = scan_roots(&paths.data_dir, &config.units.extra_dirs);
    let registry = UnitRegistry::scan(&roots);
    info!(
        snippets = registry.snippet_names().len(),
        assistants = registry.assistant_names().len(),
        "prompt units loaded"
    );

    let router = Arc::new(ProviderRouter::from_config(&config, &secrets));
    let socket = resolve_socket(cli.socket, &config, &paths);
    let (ctx, channels) = AppContext::new(db, registry, router, config, roots);

    let shutdown = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!(signal = "SIGTERM", "shutdown requested"),
            _ = sigint.recv() => info!(signal = "SIGINT", "shutdown requested"),
        }
        signal_token.cancel();
    });

    host::run(ctx, channels, socket, shutdown).await?;
    Ok(())
}
