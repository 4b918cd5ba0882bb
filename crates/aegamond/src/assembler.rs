//! Block assembler - stitches the raw line stream back into events.
//!
//! A small state machine over the tailer's line stream: recognizes block
//! open/close markers, buffers interior lines, and hands closed blocks to
//! the grammar. It also carries the one piece of cross-block state in the
//! whole pipeline: after a map-image block closes, the next image-service
//! path line is claimed for that block's play id. Only the most recent
//! outstanding request is tracked; overlapping requests replace each other
//! (accepted best-effort behavior, bounding the state by construction).

use chrono::Utc;

use crate::grammar::{
    self, BlockKind, ImagePathEvent, LogEvent, BLOCK_CLOSE, BLOCK_OPEN_FIND_SAVE,
    BLOCK_OPEN_MAP_IMAGE,
};

#[derive(Debug, Default)]
pub struct BlockAssembler {
    current_kind: Option<BlockKind>,
    buffered_lines: Vec<String>,
    pending_play_id: Option<String>,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line, in stream order, exactly once. At most one event per
    /// line; most lines produce none.
    pub fn feed(&mut self, line: &str) -> Option<LogEvent> {
        if line.is_empty() {
            return None;
        }

        // Open markers win over everything, matching the producer's format:
        // a stray open inside an open block restarts the buffer.
        if line.contains(BLOCK_OPEN_FIND_SAVE) {
            self.open(BlockKind::FindSave);
            return None;
        }
        if line.contains(BLOCK_OPEN_MAP_IMAGE) {
            self.open(BlockKind::MapImage);
            return None;
        }

        if line.contains(BLOCK_CLOSE) {
            return self.close();
        }

        if self.current_kind.is_some() {
            self.buffered_lines.push(line.to_string());
            return None;
        }

        // Outside a block: the awaited image path takes precedence over the
        // plain-line grammar so the line is consumed exactly once.
        if self.pending_play_id.is_some() {
            if let Some(path) = grammar::extract_image_path(line) {
                if let Some(play_id) = self.pending_play_id.take() {
                    return Some(LogEvent::ImagePath(ImagePathEvent {
                        play_id,
                        path,
                        timestamp: Utc::now(),
                    }));
                }
            }
        }

        grammar::parse_line(line).map(LogEvent::Line)
    }

    /// Drop the open block and the path-wait together. Called on truncation
    /// and forced re-reads so no stale half-block survives a reset.
    pub fn reset(&mut self) {
        self.current_kind = None;
        self.buffered_lines.clear();
        self.pending_play_id = None;
    }

    fn open(&mut self, kind: BlockKind) {
        self.current_kind = Some(kind);
        self.buffered_lines.clear();
    }

    fn close(&mut self) -> Option<LogEvent> {
        let kind = self.current_kind.take()?;
        let lines = std::mem::take(&mut self.buffered_lines);
        let event = grammar::parse_block(kind, &lines);

        // A new map-image request silently replaces any unresolved one.
        if let Some(LogEvent::MapImage(ref map)) = event {
            self.pending_play_id = Some(map.play_id.clone());
        }

        event
    }
}
