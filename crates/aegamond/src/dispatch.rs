//! Debounced snapshot broadcasting.
//!
//! Mutation sites call `mark_dirty()`; a single flush task waits out the
//! debounce window, swallows every signal that piled up meanwhile, and
//! sends one full serialized snapshot over a broadcast channel. There is
//! never more than one scheduled flush in flight, and frames are always
//! whole snapshots, never diffs. Subscribers that lag or disconnect only
//! affect their own receiver.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};

use crate::aggregator::Aggregator;

const FRAME_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct Dispatcher {
    dirty_tx: mpsc::UnboundedSender<()>,
    frame_tx: broadcast::Sender<Arc<String>>,
}

impl Dispatcher {
    pub fn spawn(aggregator: Arc<RwLock<Aggregator>>, debounce: Duration) -> Self {
        let (dirty_tx, dirty_rx) = mpsc::unbounded_channel();
        let (frame_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);

        tokio::spawn(flush_loop(aggregator, dirty_rx, frame_tx.clone(), debounce));

        Self { dirty_tx, frame_tx }
    }

    /// Note that the state changed. Cheap to call from any mutation site;
    /// bursts collapse into a single push.
    pub fn mark_dirty(&self) {
        let _ = self.dirty_tx.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<String>> {
        self.frame_tx.subscribe()
    }
}

async fn flush_loop(
    aggregator: Arc<RwLock<Aggregator>>,
    mut dirty_rx: mpsc::UnboundedReceiver<()>,
    frame_tx: broadcast::Sender<Arc<String>>,
    debounce: Duration,
) {
    while dirty_rx.recv().await.is_some() {
        tokio::time::sleep(debounce).await;
        // Everything that arrived during the window rides this flush.
        while dirty_rx.try_recv().is_ok() {}

        let snapshot = {
            let aggregator = aggregator.read().await;
            serde_json::to_string(aggregator.state())
        };

        match snapshot {
            // Zero receivers is not an error; subscribers come and go.
            Ok(json) => {
                let _ = frame_tx.send(Arc::new(json));
            }
            Err(err) => warn!("failed serializing state snapshot: {}", err),
        }
    }

    debug!("broadcast flush loop stopped");
}
