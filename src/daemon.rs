//! Daemon wiring: startup, background tasks, the event pump, and shutdown.

use crate::agent::pending::PendingQuestions;
use crate::agent::runner::AgentRunner;
use crate::agent::{Dispatcher, dispatch::DispatchConfig};
use crate::config::Config;
use crate::db::Db;
use crate::error::Result;
use crate::messaging::Messaging;
use crate::scan::{ScanDriverConfig, Scanner};
use crate::store::{RunStore, SessionStore};
use futures::StreamExt as _;
use std::sync::Arc;
use std::time::Duration;

/// Initialize tracing for the process. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Run the daemon until the inbound stream ends or a shutdown signal
/// arrives.
///
/// Startup order: validate credentials (the only fatal path), open the
/// store, wire the dispatcher, spawn the retention sweep, start the
/// scanner when an alert channel is configured, then pump inbound events —
/// one task per event. Shutdown stops the scanner before closing the pool
/// so no scan is left running unobserved.
pub async fn run<M: Messaging>(config: Config, messaging: Arc<M>) -> Result<()> {
    config.validate()?;
    tracing::info!(
        model = config.agent.model_tier.model_id(),
        mode = config.scan.mode.as_str(),
        "starting opsbot"
    );

    let db = Db::connect(&config.store.path).await?;
    let sessions = SessionStore::new(db.sqlite.clone());
    let runs = RunStore::new(db.sqlite.clone());

    let dispatcher = Arc::new(Dispatcher::new(
        sessions.clone(),
        runs.clone(),
        PendingQuestions::default(),
        AgentRunner::new(config.agent.clone()),
        messaging.clone(),
        DispatchConfig::from(&config),
    ));

    let sweep_task = spawn_retention_sweep(
        sessions.clone(),
        Duration::from_secs(config.retention.sweep_interval_secs),
        config.retention.window_days,
    );

    let mut scanner = match &config.messaging.alert_channel {
        Some(alert_channel) if !config.scan.targets.is_empty() => {
            let mut scanner = Scanner::new(
                dispatcher.clone(),
                runs.clone(),
                sessions.clone(),
                messaging.clone(),
                ScanDriverConfig {
                    interval: Duration::from_secs(config.scan.interval_secs),
                    startle_delay: Duration::from_secs(config.scan.startle_delay_secs),
                    targets: config.scan.targets.clone(),
                    mode: config.scan.mode,
                    alert_channel: alert_channel.clone(),
                },
            );
            scanner.start();
            Some(scanner)
        }
        _ => {
            tracing::warn!("no alert channel or targets configured, scheduled scans disabled");
            None
        }
    };

    let mut inbound = messaging.start().await?;
    tracing::info!(adapter = messaging.name(), "listening for chat events");

    loop {
        tokio::select! {
            maybe_event = inbound.next() => {
                match maybe_event {
                    Some(event) => {
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            dispatcher.handle_event(event).await;
                        });
                    }
                    None => {
                        tracing::info!("inbound stream closed");
                        break;
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(error) = result {
                    tracing::warn!(%error, "failed to listen for shutdown signal");
                }
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    if let Some(scanner) = scanner.as_mut() {
        scanner.stop().await;
    }
    sweep_task.abort();
    let _ = sweep_task.await;
    db.close().await;

    tracing::info!("opsbot stopped");
    Ok(())
}

/// Spawn the periodic session retention sweep.
fn spawn_retention_sweep(
    sessions: SessionStore,
    interval: Duration,
    window_days: i64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match sessions.delete_older_than(window_days).await {
                Ok(deleted) => match sessions.count().await {
                    Ok(remaining) => {
                        tracing::info!(deleted, remaining, "session retention sweep complete");
                    }
                    Err(error) => {
                        tracing::warn!(%error, deleted, "session count unavailable after sweep");
                    }
                },
                Err(error) => tracing::error!(%error, "session retention sweep failed"),
            }
        }
    })
}
