//! Command handlers for the CLI.

use color_eyre::{eyre::eyre, Result};
use futures::future;
use offsync::{Config, ConnectivitySignal, Engine, MonitorStatus};
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::info;

use crate::Cmd;

/// Run one command against a freshly opened engine.
pub async fn run(config: &Config, offline: bool, command: Cmd) -> Result<()> {
  let engine = Engine::open(config, ConnectivitySignal::new(!offline))?;

  match command {
    Cmd::Get { path } => print_json(&engine.read(&path).await?)?,
    Cmd::Send { method, path, data } => {
      let method = parse_method(&method)?;
      let body = data.as_deref().map(parse_body).transpose()?;
      print_json(&engine.write(method, &path, body).await?)?;
    }
    Cmd::Sync => {
      if !offline {
        probe_once(&engine, config).await;
      }
      if !engine.is_online() {
        return Err(eyre!("Server unreachable, {} action(s) still queued", engine.pending_count()?));
      }
      print_json(&engine.sync().await?)?;
    }
    Cmd::Status => {
      if !offline {
        probe_once(&engine, config).await;
      }
      print_json(&json!({
        "online": engine.is_online(),
        "pending": engine.pending_count()?,
      }))?;
    }
    Cmd::Pending => print_json(&engine.pending_actions()?)?,
    Cmd::Clear { queue_only } => {
      if queue_only {
        engine.clear_pending()?;
      } else {
        engine.clear_all()?;
      }
      info!(queue_only, "cleared offline store");
    }
    Cmd::Watch => watch_connectivity(&engine, config, offline).await?,
  }

  engine.close_all()?;
  Ok(())
}

async fn probe_once(engine: &Engine, config: &Config) {
  engine
    .health_probe(&config.monitor.health_path, config.probe_interval())
    .check()
    .await;
}

/// Run the monitor and health probe until Ctrl-C, printing each status change.
async fn watch_connectivity(engine: &Engine, config: &Config, offline: bool) -> Result<()> {
  let monitor = engine
    .monitor()
    .with_poll_interval(config.poll_interval())
    .with_sync_on_start(config.monitor.sync_on_start);
  let probe = engine.health_probe(&config.monitor.health_path, config.probe_interval());
  let mut status_rx = monitor.subscribe();

  let probing = async {
    if offline {
      future::pending::<()>().await
    } else {
      probe.run(future::pending()).await
    }
  };

  tokio::select! {
    res = tokio::signal::ctrl_c() => res.map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?,
    _ = monitor.run(future::pending()) => {}
    _ = probing => {}
    res = print_status_changes(&mut status_rx) => res?,
  }

  Ok(())
}

async fn print_status_changes(rx: &mut watch::Receiver<MonitorStatus>) -> Result<()> {
  print_json(&*rx.borrow_and_update())?;
  while rx.changed().await.is_ok() {
    let status = rx.borrow_and_update().clone();
    print_json(&status)?;
  }
  Ok(())
}

fn parse_method(method: &str) -> Result<Method> {
  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
  match method {
    Method::POST | Method::PUT | Method::PATCH | Method::DELETE => Ok(method),
    other => Err(eyre!("{} is not a write; use `get` for reads", other)),
  }
}

fn parse_body(data: &str) -> Result<Value> {
  serde_json::from_str(data).map_err(|e| eyre!("Invalid JSON body: {}", e))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
