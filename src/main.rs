mod commands;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline-first API client with a durable cache and write queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Treat the server as unreachable: serve reads from cache, queue writes
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
  /// Read a resource
  Get { path: String },
  /// Send a mutation (POST, PUT, PATCH or DELETE)
  Send {
    method: String,
    path: String,
    /// JSON request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Replay queued mutations now
  Sync,
  /// Show connectivity and queue depth
  Status,
  /// List queued mutations in replay order
  Pending,
  /// Drop the queue, and the cache unless --queue-only is given
  Clear {
    #[arg(long)]
    queue_only: bool,
  },
  /// Watch connectivity and sync on reconnect until Ctrl-C
  Watch,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Keep the guard alive so buffered log lines are flushed on exit
  let _log_guard = offsync::logging::init()?;

  let config = offsync::Config::load(args.config.as_deref())?;

  commands::run(&config, args.offline, args.command).await
}
