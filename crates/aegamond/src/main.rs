//! Aegamond - Aega fleet log monitor daemon.
//!
//! Tails the application log, probes fleet health, and pushes the
//! aggregated view to dashboard viewers in near-real-time.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use aegamond::aggregator::Aggregator;
use aegamond::config::MonitorConfig;
use aegamond::dispatch::Dispatcher;
use aegamond::health;
use aegamond::server::{self, AppState};
use aegamond::watcher::LogWatcher;

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("aegamond v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(MonitorConfig::load());
    info!(
        "Watching {}, serving on {}",
        config.log_path.display(),
        config.bind_addr
    );

    let aggregator = Arc::new(RwLock::new(Aggregator::new(config.linux_servers.len())));
    let dispatcher = Dispatcher::spawn(Arc::clone(&aggregator), config.debounce());

    // A failed subsystem start degrades the daemon, it never kills it: the
    // state endpoint and the remaining producers keep serving.
    let _log_watcher = match LogWatcher::spawn(
        Arc::clone(&config),
        Arc::clone(&aggregator),
        dispatcher.clone(),
    ) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            error!("Log watching disabled: {:#}", err);
            None
        }
    };

    if let Err(err) = health::spawn_health_tasks(
        Arc::clone(&config),
        Arc::clone(&aggregator),
        dispatcher.clone(),
    ) {
        error!("Health checks disabled: {:#}", err);
    }

    spawn_summary_ticker(
        Arc::clone(&config),
        Arc::clone(&aggregator),
        dispatcher.clone(),
    );

    let state = AppState::new(aggregator, dispatcher, config);
    server::run(state).await?;

    info!("Shutting down gracefully");
    Ok(())
}

/// Append one request-rate point per interval, labeled with the current
/// minute, so the dashboard graph moves even when the log is quiet.
fn spawn_summary_ticker(
    config: Arc<MonitorConfig>,
    aggregator: Arc<RwLock<Aggregator>>,
    dispatcher: Dispatcher,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.summary_interval());
        loop {
            ticker.tick().await;

            let label = chrono::Local::now().format("%H:%M").to_string();
            if aggregator.write().await.record_summary_point(label) {
                dispatcher.mark_dirty();
            }
        }
    });
}
