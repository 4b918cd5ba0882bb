//! Health probing for the fixed endpoint roster.
//!
//! Two independent check kinds: HTTP GET against the two named application
//! endpoints, raw TCP connect against the Linux analysis fleet. Both run an
//! immediate pass at startup and then on their own fixed interval. Failures
//! of any flavor (refused, timed out, bad status) are an `error` report,
//! never a daemon error.

use aegamon_common::{Endpoint, EndpointStatus, ProbeStatus};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout};
use tracing::{debug, info};

use crate::aggregator::Aggregator;
use crate::config::MonitorConfig;
use crate::dispatch::Dispatcher;

/// Status codes in [200, 400) count as reachable; redirects mean the
/// service is up even if it wants the caller elsewhere.
pub async fn check_http(client: &reqwest::Client, url: &str) -> ProbeStatus {
    match client.get(url).send().await {
        Ok(response) => {
            let code = response.status().as_u16();
            if (200..400).contains(&code) {
                ProbeStatus::Active
            } else {
                debug!("HTTP check for {} returned status {}", url, code);
                ProbeStatus::Error
            }
        }
        Err(err) => {
            debug!("HTTP check for {} failed: {}", url, err);
            ProbeStatus::Error
        }
    }
}

/// Reachable means the connection was established within the timeout. The
/// connection is dropped immediately so probes never hold fleet resources.
pub async fn check_tcp(host: &str, port: u16, limit: Duration) -> ProbeStatus {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            ProbeStatus::Active
        }
        Ok(Err(err)) => {
            debug!("TCP check for {}:{} failed: {}", host, port, err);
            ProbeStatus::Error
        }
        Err(_) => {
            debug!("TCP check for {}:{} timed out after {:?}", host, port, limit);
            ProbeStatus::Error
        }
    }
}

/// Probe the whole roster concurrently. The report always contains every
/// configured endpoint, in roster order, whatever the individual outcomes.
pub async fn probe_roster(roster: &[Endpoint], limit: Duration) -> Vec<EndpointStatus> {
    let mut report: Vec<EndpointStatus> = roster
        .iter()
        .map(|endpoint| EndpointStatus::new(endpoint, ProbeStatus::Error))
        .collect();

    let mut probes = JoinSet::new();
    for (index, endpoint) in roster.iter().cloned().enumerate() {
        probes.spawn(async move {
            let status = check_tcp(&endpoint.host, endpoint.port, limit).await;
            (index, status)
        });
    }

    while let Some(joined) = probes.join_next().await {
        if let Ok((index, status)) = joined {
            report[index].status = status;
        }
    }

    report
}

/// Start the two probe schedules. Each reports into the aggregator through
/// its own contract: named status for the HTTP targets, the full roster
/// array for the fleet.
pub fn spawn_health_tasks(
    config: Arc<MonitorConfig>,
    aggregator: Arc<RwLock<Aggregator>>,
    dispatcher: Dispatcher,
) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(config.health_timeout())
        .build()?;

    info!(
        "Health checks starting (interval: {}s, timeout: {}s, fleet: {})",
        config.health_interval_secs,
        config.health_timeout_secs,
        config.linux_servers.len()
    );

    {
        let config = Arc::clone(&config);
        let aggregator = Arc::clone(&aggregator);
        let dispatcher = dispatcher.clone();

        tokio::spawn(async move {
            let mut ticker = interval(config.health_interval());
            loop {
                ticker.tick().await;

                for (name, url) in [
                    ("window", config.window_server_url.as_str()),
                    ("nginx", config.nginx_url.as_str()),
                ] {
                    let status = check_http(&client, url).await;
                    let changed = aggregator.write().await.apply_http_status(name, status);
                    if changed {
                        info!("{} server health changed to {}", name, status.as_str());
                        dispatcher.mark_dirty();
                    }
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut ticker = interval(config.health_interval());
        loop {
            ticker.tick().await;

            let report = probe_roster(&config.linux_servers, config.health_timeout()).await;
            let changed = aggregator.write().await.apply_roster(report);
            if changed {
                dispatcher.mark_dirty();
            }
        }
    });

    Ok(())
}
