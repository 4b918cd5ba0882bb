//! Incremental log reader.
//!
//! Keeps a byte cursor into the growing log and returns only the lines
//! appended since the previous successful poll. A shrinking file means the
//! producer rotated or truncated it: the cursor restarts at zero and the
//! batch is flagged so the caller can reset its block-assembly state before
//! reprocessing. Transient I/O failures yield an empty batch and leave the
//! cursor untouched, so the same byte range is retried on the next poll.

use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

/// Lines produced by one poll. `reset` is set when the cursor restarted at
/// zero (truncation or forced full read) and parsing state must be dropped
/// before these lines are fed.
#[derive(Debug, Default)]
pub struct TailBatch {
    pub lines: Vec<String>,
    pub reset: bool,
}

#[derive(Debug, Default)]
pub struct LogTailer {
    cursor: u64,
}

impl LogTailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Read everything appended since the last successful poll, in file
    /// order. `force_full` restarts from offset zero regardless of the
    /// stored cursor (initial discovery, defensive re-reads).
    pub async fn poll(&mut self, path: &Path, force_full: bool) -> TailBatch {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(err) => {
                debug!("log file not readable yet at {}: {}", path.display(), err);
                return TailBatch::default();
            }
        };

        let truncated = size < self.cursor;
        if truncated {
            info!(
                "log file truncated ({} -> {} bytes), restarting from offset 0",
                self.cursor, size
            );
        }

        let reset = force_full || truncated;
        let start = if reset { 0 } else { self.cursor };

        if size <= start {
            // Nothing to read; an empty truncated file still moves the
            // cursor back so growth is picked up from zero.
            self.cursor = size;
            return TailBatch {
                lines: Vec::new(),
                reset,
            };
        }

        let bytes = match read_range(path, start, size - start).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("failed reading {}: {}", path.display(), err);
                return TailBatch::default();
            }
        };

        self.cursor = start + bytes.len() as u64;
        let text = String::from_utf8_lossy(&bytes);

        TailBatch {
            lines: split_lines(&text),
            reset,
        }
    }
}

async fn read_range(path: &Path, start: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut buf).await?;

    Ok(buf)
}

/// Split on `\n` or `\r\n`, dropping the trailing empty fragment a final
/// newline produces.
fn split_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect();

    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    lines
}
