use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "racehub", version, about = "Session coordinator and track distribution service")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand)]
pub enum Cmd {
    /// Run the coordinator
    Serve {
        /// Config file (defaults to the platform data directory)
        #[arg(long)]
        config: Option<PathBuf>,
        /// HTTP API bind address
        #[arg(long)]
        http: Option<SocketAddr>,
        /// Realtime websocket bind address
        #[arg(long)]
        realtime: Option<SocketAddr>,
    },
    /// Print the content hash of a track file
    Hash { file: PathBuf },
    /// Check a track file against a content hash
    Verify { file: PathBuf, hash: String },
    /// Print the content hashes of every track under a directory
    Catalog { dir: PathBuf },
    /// Write a config file with default values
    InitConfig {
        /// Destination (defaults to the platform data directory)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
