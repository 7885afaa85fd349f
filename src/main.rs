//! RaceHub - Session Coordinator
//!
//! Main entry point for the service.

use anyhow::Context;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use racehub::api::Coordinator;
use racehub::storage::config::{self, AppConfig};
use racehub::tracks::{ContentHash, TrackCatalog};

mod cli;

use cli::{Cli, Cmd};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Serve {
            config,
            http,
            realtime,
        } => {
            let mut app_config = config::load_config(config.as_deref())?;
            if let Some(addr) = http {
                app_config.server.http_addr = addr;
            }
            if let Some(addr) = realtime {
                app_config.server.realtime_addr = addr;
            }
            serve(app_config).await
        }
        Cmd::Hash { file } => {
            let hash = hash_file(&file)?;
            println!("{}  {}", hash, file.display());
            Ok(())
        }
        Cmd::Verify { file, hash } => {
            let expected = ContentHash::parse(&hash)?;
            let actual = hash_file(&file)?;
            if actual != expected {
                anyhow::bail!("{}: hash mismatch (expected {}, got {})", file.display(), expected, actual);
            }
            println!("{}: OK", file.display());
            Ok(())
        }
        Cmd::Catalog { dir } => {
            let catalog = TrackCatalog::scan_dir(&dir)
                .with_context(|| format!("failed to scan {}", dir.display()))?;
            let mut hashes: Vec<_> = catalog.iter().collect();
            hashes.sort();
            for hash in hashes {
                println!("{}", hash);
            }
            Ok(())
        }
        Cmd::InitConfig { path, force } => {
            let target = path.clone().unwrap_or_else(config::get_config_path);
            if target.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", target.display());
            }
            let written = config::save_config(&AppConfig::default(), Some(target.as_path()))?;
            println!("Wrote {}", written.display());
            Ok(())
        }
    }
}

async fn serve(app_config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("Starting RaceHub v{}", env!("CARGO_PKG_VERSION"));

    let coordinator = Arc::new(Coordinator::new(
        app_config.coordinator_settings(),
        app_config.server.default_game_port,
    ));

    let http_listener = TcpListener::bind(app_config.server.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", app_config.server.http_addr))?;
    let realtime_listener = TcpListener::bind(app_config.server.realtime_addr)
        .await
        .with_context(|| format!("failed to bind {}", app_config.server.realtime_addr))?;

    coordinator
        .serve(http_listener, realtime_listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    Ok(())
}

fn hash_file(path: &Path) -> anyhow::Result<ContentHash> {
    let payload = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(ContentHash::of(&payload))
}
