//! Log file watcher - drives the tail/assemble/aggregate pipeline.
//!
//! notify runs in polling mode: the tomcat producer keeps the log open with
//! exclusive append locks and platform-native change events are unreliable
//! against it. The notify callback only enqueues poll requests; a single
//! consumer task owns the tailer and assembler, so two polls for the same
//! path can never interleave.

use anyhow::{Context, Result};
use notify::{
    Config as NotifyConfig, Event, EventKind, PollWatcher, RecursiveMode,
    Watcher as NotifyWatcher,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::assembler::BlockAssembler;
use crate::config::MonitorConfig;
use crate::dispatch::Dispatcher;
use crate::tail::LogTailer;

/// One poll request for the watched log file.
#[derive(Debug, Clone, Copy)]
pub struct TailRequest {
    pub force_full: bool,
}

pub struct LogWatcher {
    _watcher: PollWatcher,
}

impl LogWatcher {
    /// Watch the log file's directory and start the consumer task. The file
    /// itself may not exist yet; it is picked up when it appears.
    pub fn spawn(
        config: Arc<MonitorConfig>,
        aggregator: Arc<RwLock<Aggregator>>,
        dispatcher: Dispatcher,
    ) -> Result<Self> {
        let log_path = config.log_path.clone();
        let watch_dir = log_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        match std::fs::metadata(&log_path) {
            Ok(meta) => info!(
                "Log file found ({} bytes): {}",
                meta.len(),
                log_path.display()
            ),
            Err(_) => info!(
                "Log file {} does not exist yet, waiting for it to appear",
                log_path.display()
            ),
        }

        let (tx, rx) = mpsc::unbounded_channel::<TailRequest>();

        let file_name = log_path.file_name().map(|name| name.to_os_string());
        let callback_tx = tx.clone();
        let mut watcher = PollWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref());
                    if !ours {
                        return;
                    }

                    match event.kind {
                        // A fresh file starts over from offset zero.
                        EventKind::Create(_) => {
                            let _ = callback_tx.send(TailRequest { force_full: true });
                        }
                        EventKind::Modify(_) | EventKind::Any => {
                            let _ = callback_tx.send(TailRequest { force_full: false });
                        }
                        _ => {}
                    }
                }
                Err(err) => warn!("Watch error: {}", err),
            },
            NotifyConfig::default().with_poll_interval(config.poll_interval()),
        )
        .context("failed creating log file watcher")?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed watching {}", watch_dir.display()))?;

        // Defensive full read now that the watch is in place, covering
        // content that predates the watcher or a missed create event.
        let _ = tx.send(TailRequest { force_full: true });

        tokio::spawn(process_requests(log_path, rx, aggregator, dispatcher));

        info!("Log watcher started");
        Ok(Self { _watcher: watcher })
    }
}

/// Single consumer of poll requests. Owns the read cursor and block state;
/// a truncated or force-read batch resets the assembler before any of its
/// lines are fed.
async fn process_requests(
    path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<TailRequest>,
    aggregator: Arc<RwLock<Aggregator>>,
    dispatcher: Dispatcher,
) {
    let mut tailer = LogTailer::new();
    let mut assembler = BlockAssembler::new();

    while let Some(request) = rx.recv().await {
        let batch = tailer.poll(&path, request.force_full).await;
        if batch.reset {
            assembler.reset();
        }
        if batch.lines.is_empty() {
            continue;
        }

        debug!("processing {} new log lines", batch.lines.len());

        let mut dirty = false;
        {
            let mut aggregator = aggregator.write().await;
            for line in &batch.lines {
                if let Some(event) = assembler.feed(line) {
                    dirty |= aggregator.apply_event(&event);
                }
            }
        }

        if dirty {
            dispatcher.mark_dirty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn test_config(log_path: PathBuf) -> Arc<MonitorConfig> {
        Arc::new(MonitorConfig {
            log_path,
            linux_servers: Vec::new(),
            ..MonitorConfig::default()
        })
    }

    async fn wait_for<F>(deadline: Duration, mut check: F)
    where
        F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send>>,
    {
        timeout(deadline, async {
            loop {
                if check().await {
                    return;
                }
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_preexisting_content_is_processed_on_startup() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("AegaServerLog.log");
        std::fs::write(
            &log_path,
            "2024-01-01 10:00:00.000 - ERROR 1 [main] a.B : Login fail DeviceIp[10.0.0.5]\n",
        )
        .unwrap();

        let config = test_config(log_path);
        let aggregator = Arc::new(RwLock::new(Aggregator::new(0)));
        let dispatcher = Dispatcher::spawn(Arc::clone(&aggregator), Duration::from_millis(10));

        let _watcher =
            LogWatcher::spawn(config, Arc::clone(&aggregator), dispatcher).unwrap();

        let probe = Arc::clone(&aggregator);
        wait_for(Duration::from_secs(5), move || {
            let probe = Arc::clone(&probe);
            Box::pin(async move { probe.read().await.state().global.error_count == 1 })
        })
        .await;
    }

    #[tokio::test]
    async fn test_truncation_mid_block_never_emits_stale_event() {
        use crate::grammar::{BLOCK_CLOSE, BLOCK_OPEN_FIND_SAVE};
        use crate::tail::LogTailer;
        use crate::assembler::BlockAssembler;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AegaServerLog.log");

        // First generation ends mid-block, with the success flag already read.
        std::fs::write(
            &path,
            format!(
                "{}\nHoleNo : 3\nCameraNo : 1\nMatchingResult : true\n",
                BLOCK_OPEN_FIND_SAVE
            ),
        )
        .unwrap();

        let mut tailer = LogTailer::new();
        let mut assembler = BlockAssembler::new();
        let mut aggregator = Aggregator::new(0);

        let batch = tailer.poll(&path, false).await;
        for line in &batch.lines {
            if let Some(event) = assembler.feed(line) {
                aggregator.apply_event(&event);
            }
        }

        // The producer rotates the file; only a stray close marker remains.
        std::fs::write(&path, format!("{}\n", BLOCK_CLOSE)).unwrap();
        let batch = tailer.poll(&path, false).await;
        assert!(batch.reset);
        if batch.reset {
            assembler.reset();
        }
        for line in &batch.lines {
            if let Some(event) = assembler.feed(line) {
                aggregator.apply_event(&event);
            }
        }

        // No stale half-block was completed into an event.
        assert!(aggregator.state().servers.is_empty());
        assert_eq!(aggregator.state().global.total_log_lines, 0);
    }

    #[tokio::test]
    async fn test_appended_content_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("AegaServerLog.log");
        std::fs::write(&log_path, "").unwrap();

        let config = test_config(log_path.clone());
        let aggregator = Arc::new(RwLock::new(Aggregator::new(0)));
        let dispatcher = Dispatcher::spawn(Arc::clone(&aggregator), Duration::from_millis(10));

        let _watcher =
            LogWatcher::spawn(config, Arc::clone(&aggregator), dispatcher).unwrap();

        // Let the initial forced read land before appending.
        sleep(Duration::from_millis(300)).await;

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&log_path)
            .unwrap();
        writeln!(
            file,
            "2024-01-01 10:00:01.000 - INFO 1 [w] a.B : analysis 3/1 took 120ms"
        )
        .unwrap();
        drop(file);

        let probe = Arc::clone(&aggregator);
        wait_for(Duration::from_secs(10), move || {
            let probe = Arc::clone(&probe);
            Box::pin(async move { probe.read().await.state().servers.contains_key("3/1") })
        })
        .await;
    }
}
