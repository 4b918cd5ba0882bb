//! Log line and block grammar.
//!
//! Pure functions from raw text to typed events. No I/O, no state: the
//! block assembler owns buffering and hands fully accumulated blocks here.
//! Unrecognized input is `None`, never an error - the log is full of lines
//! this grammar does not cover and that is expected.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// Opening marker for a ball-search result block.
pub const BLOCK_OPEN_FIND_SAVE: &str = "////////////FindSaveRequest////////////";
/// Opening marker for a map-image request block.
pub const BLOCK_OPEN_MAP_IMAGE: &str = "////////////GetMapImageRequest////////////";
/// Shared closing marker terminating whichever block is open.
pub const BLOCK_CLOSE: &str = "///////////////////////////////////////";

/// Logger emitting the rendered-map path line a map-image block correlates to.
pub const IMAGE_SERVICE_LOGGER: &str = "ImageService";

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}[.,]\d{3})\s+-\s+(?P<level>[A-Z]+)\s+(?P<pid>\d+)\s+\[(?P<thread>[^\]]+)\]\s+(?P<logger>\S+)\s+:\s?(?P<msg>.*)$",
    )
    .expect("line grammar regex")
});

static LOGIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLogin\s+(?P<outcome>success|fail)\b").expect("login regex"));

static DEVICE_IP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"DeviceIp\[(?P<ip>\d{1,3}(?:\.\d{1,3}){3})\]").expect("device ip regex")
});

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?P<val>\d+(?:\.\d+)?)(?P<unit>ms|sec)\b").expect("duration regex")
});

static SAVE_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<path>https?://\S+|[A-Za-z]:\\\S+)").expect("save path regex")
});

static CAMERA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?P<hole>\d+)/(?P<cam>\d+)\b").expect("camera id regex"));

static PLAY_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"PlayId\s*:\s*(?P<id>\S+)").expect("play id regex"));

static SERVER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"리눅스:\s*(?P<name>[\w-]+)").expect("server name regex"));

static WIN_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<path>[A-Za-z]:\\\S+)").expect("windows path regex"));

/// Which block kind an open marker started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    FindSave,
    MapImage,
}

/// Outcome of a login phrase in a structured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    Fail,
}

/// Composite `hole/camera` identifier keying per-unit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraId {
    pub hole: u32,
    pub camera: u32,
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hole, self.camera)
    }
}

/// A successful ball-search block (`MatchingResult : true` only).
#[derive(Debug, Clone, PartialEq)]
pub struct FindSaveEvent {
    pub hole_no: Option<String>,
    pub camera_no: Option<String>,
    pub kiosk_ty_code: Option<String>,
    pub play_id: Option<String>,
    pub matching_result: String,
    pub coordinate_x: Option<String>,
    pub coordinate_y: Option<String>,
    pub message: Option<String>,
    pub server: String,
    pub timestamp: DateTime<Utc>,
}

impl FindSaveEvent {
    /// Composite record key, present only when both halves were logged.
    pub fn camera_key(&self) -> Option<String> {
        match (&self.hole_no, &self.camera_no) {
            (Some(hole), Some(camera)) => Some(format!("{}/{}", hole, camera)),
            _ => None,
        }
    }
}

/// A map-image request block (requires a `playid` key).
#[derive(Debug, Clone, PartialEq)]
pub struct MapImageEvent {
    pub glcr: Option<String>,
    pub golf_cours_id: Option<String>,
    pub hole_no: Option<String>,
    pub kiosk_ty_code: Option<String>,
    pub play_id: String,
    pub timestamp: DateTime<Utc>,
}

/// The rendered-map path correlated back to an earlier map-image block.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePathEvent {
    pub play_id: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
}

/// One structured single line with its optional typed extractions.
///
/// Every extraction is independent; a line may carry none or several.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEvent {
    pub timestamp: String,
    pub level: String,
    pub pid: u32,
    pub thread: String,
    pub logger: String,
    pub message: String,
    pub login: Option<LoginOutcome>,
    pub device_ip: Option<String>,
    pub durations_ms: Vec<f64>,
    pub save_path: Option<String>,
    pub camera: Option<CameraId>,
    pub play_id: Option<String>,
}

impl LineEvent {
    pub fn is_error_level(&self) -> bool {
        matches!(self.level.as_str(), "ERROR" | "CRITICAL" | "FATAL")
    }
}

/// Everything the parser can produce, consumed exactly once by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    FindSave(FindSaveEvent),
    MapImage(MapImageEvent),
    ImagePath(ImagePathEvent),
    Line(LineEvent),
}

/// Parse one physical log line against the fixed single-line grammar.
pub fn parse_line(line: &str) -> Option<LineEvent> {
    let caps = LINE_RE.captures(line)?;
    let message = caps["msg"].to_string();

    let login = LOGIN_RE.captures(&message).map(|c| {
        if c["outcome"].eq_ignore_ascii_case("success") {
            LoginOutcome::Success
        } else {
            LoginOutcome::Fail
        }
    });

    let device_ip = DEVICE_IP_RE
        .captures(&message)
        .map(|c| c["ip"].to_string());

    let durations_ms = DURATION_RE
        .captures_iter(&message)
        .filter_map(|c| {
            let value: f64 = c["val"].parse().ok()?;
            Some(match &c["unit"] {
                "sec" => value * 1000.0,
                _ => value,
            })
        })
        .collect();

    let save_path = SAVE_PATH_RE
        .captures(&message)
        .map(|c| c["path"].to_string());

    let camera = CAMERA_RE.captures(&message).and_then(|c| {
        Some(CameraId {
            hole: c["hole"].parse().ok()?,
            camera: c["cam"].parse().ok()?,
        })
    });

    let play_id = PLAY_ID_RE.captures(&message).map(|c| c["id"].to_string());

    Some(LineEvent {
        timestamp: caps["ts"].to_string(),
        level: caps["level"].to_string(),
        pid: caps["pid"].parse().ok()?,
        thread: caps["thread"].to_string(),
        logger: caps["logger"].to_string(),
        message,
        login,
        device_ip,
        durations_ms,
        save_path,
        camera,
        play_id,
    })
}

/// Interpret a fully accumulated block according to the kind that opened it.
pub fn parse_block(kind: BlockKind, lines: &[String]) -> Option<LogEvent> {
    match kind {
        BlockKind::FindSave => parse_find_save(&fold_pairs(lines, false)).map(LogEvent::FindSave),
        BlockKind::MapImage => parse_map_image(&fold_pairs(lines, true)).map(LogEvent::MapImage),
    }
}

/// Extract the rendered-map path from an image-service line, if present.
pub fn extract_image_path(line: &str) -> Option<String> {
    if !line.contains(IMAGE_SERVICE_LOGGER) {
        return None;
    }
    WIN_PATH_RE.captures(line).map(|c| c["path"].to_string())
}

/// Fold `Key : Value` interior lines into a mapping. The first colon wins;
/// both sides are trimmed. Lines without a colon are skipped.
fn fold_pairs(lines: &[String], lowercase_keys: bool) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let key = if lowercase_keys {
                key.to_lowercase()
            } else {
                key.to_string()
            };
            map.insert(key, value.trim().to_string());
        }
    }
    map
}

/// A search block counts only when the match actually succeeded; anything
/// else (including a missing `MatchingResult`) is a no-op, not an error.
fn parse_find_save(fields: &HashMap<String, String>) -> Option<FindSaveEvent> {
    if fields.get("MatchingResult").map(String::as_str) != Some("true") {
        return None;
    }

    let message = fields.get("Message").cloned();
    let server = message
        .as_deref()
        .and_then(|m| SERVER_NAME_RE.captures(m))
        .map(|c| c["name"].to_string())
        .unwrap_or_else(|| "N/A".to_string());

    Some(FindSaveEvent {
        hole_no: fields.get("HoleNo").cloned(),
        camera_no: fields.get("CameraNo").cloned(),
        kiosk_ty_code: fields.get("KioskTyCode").cloned(),
        play_id: fields.get("PlayId").cloned(),
        matching_result: "true".to_string(),
        coordinate_x: fields.get("CoordinateX").cloned(),
        coordinate_y: fields.get("CoordinateY").cloned(),
        message,
        server,
        timestamp: Utc::now(),
    })
}

fn parse_map_image(fields: &HashMap<String, String>) -> Option<MapImageEvent> {
    let play_id = fields.get("playid")?.clone();

    Some(MapImageEvent {
        glcr: fields.get("glcr").cloned(),
        golf_cours_id: fields.get("golfcoursid").cloned(),
        hole_no: fields.get("holeno").cloned(),
        kiosk_ty_code: fields.get("kiosktycode").cloned(),
        play_id,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_plain_line() {
        let event = parse_line(
            "2024-01-01 10:00:00.000 - ERROR 123 [main] some.Logger : Login fail DeviceIp[10.0.0.5]",
        )
        .unwrap();

        assert_eq!(event.timestamp, "2024-01-01 10:00:00.000");
        assert_eq!(event.level, "ERROR");
        assert_eq!(event.pid, 123);
        assert_eq!(event.thread, "main");
        assert_eq!(event.logger, "some.Logger");
        assert_eq!(event.login, Some(LoginOutcome::Fail));
        assert_eq!(event.device_ip.as_deref(), Some("10.0.0.5"));
        assert!(event.is_error_level());
        assert!(event.camera.is_none());
    }

    #[test]
    fn test_malformed_line_is_none() {
        assert!(parse_line("not a structured line").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line("2024-01-01 - missing pieces").is_none());
    }

    #[test]
    fn test_duration_extraction_converts_seconds() {
        let event = parse_line(
            "2024-01-01 10:00:01.500 - INFO 123 [worker-1] a.AnalysisService : analysis for 3/1 took 250ms then 1.5sec",
        )
        .unwrap();

        assert_eq!(event.durations_ms, vec![250.0, 1500.0]);
        let camera = event.camera.unwrap();
        assert_eq!((camera.hole, camera.camera), (3, 1));
        assert_eq!(camera.to_string(), "3/1");
    }

    #[test]
    fn test_play_id_and_save_path_extraction() {
        let event = parse_line(
            r"2024-01-01 10:00:02.000 - INFO 123 [worker-2] a.SaveService : saved PlayId : P777 to C:\golf\save\P777.dat",
        )
        .unwrap();

        assert_eq!(event.play_id.as_deref(), Some("P777"));
        assert_eq!(event.save_path.as_deref(), Some(r"C:\golf\save\P777.dat"));
        assert_eq!(event.login, None);
    }

    #[test]
    fn test_find_save_block_success() {
        let event = parse_block(
            BlockKind::FindSave,
            &lines(&[
                "HoleNo : 3",
                "CameraNo : 1",
                "PlayId : P123",
                "MatchingResult : true",
                "Message : 리눅스: srv01, ball found at (10, 20)",
            ]),
        );

        match event {
            Some(LogEvent::FindSave(found)) => {
                assert_eq!(found.hole_no.as_deref(), Some("3"));
                assert_eq!(found.camera_no.as_deref(), Some("1"));
                assert_eq!(found.camera_key().as_deref(), Some("3/1"));
                assert_eq!(found.play_id.as_deref(), Some("P123"));
                assert_eq!(found.server, "srv01");
            }
            other => panic!("expected FindSave event, got {:?}", other),
        }
    }

    #[test]
    fn test_find_save_block_requires_true_match() {
        let failed = parse_block(
            BlockKind::FindSave,
            &lines(&["HoleNo : 3", "CameraNo : 1", "MatchingResult : false"]),
        );
        assert!(failed.is_none());

        let absent = parse_block(BlockKind::FindSave, &lines(&["HoleNo : 3", "CameraNo : 1"]));
        assert!(absent.is_none());
    }

    #[test]
    fn test_find_save_server_defaults_when_absent() {
        let event = parse_block(
            BlockKind::FindSave,
            &lines(&["MatchingResult : true", "Message : ball found"]),
        );

        match event {
            Some(LogEvent::FindSave(found)) => {
                assert_eq!(found.server, "N/A");
                assert_eq!(found.camera_key(), None);
            }
            other => panic!("expected FindSave event, got {:?}", other),
        }
    }

    #[test]
    fn test_map_image_block_keys_case_insensitive() {
        let event = parse_block(
            BlockKind::MapImage,
            &lines(&[
                "GLCR : A1",
                "GolfCoursId : GC7",
                "HoleNo : 9",
                "KioskTyCode : K2",
                "PlayId : P456",
            ]),
        );

        match event {
            Some(LogEvent::MapImage(map)) => {
                assert_eq!(map.play_id, "P456");
                assert_eq!(map.glcr.as_deref(), Some("A1"));
                assert_eq!(map.golf_cours_id.as_deref(), Some("GC7"));
                assert_eq!(map.hole_no.as_deref(), Some("9"));
            }
            other => panic!("expected MapImage event, got {:?}", other),
        }
    }

    #[test]
    fn test_map_image_block_requires_play_id() {
        let event = parse_block(
            BlockKind::MapImage,
            &lines(&["GLCR : A1", "HoleNo : 9"]),
        );
        assert!(event.is_none());
    }

    #[test]
    fn test_image_path_extraction() {
        let line = r"2024-01-01 10:00:05.000 - INFO 123 [http-1] c.a.w.d.s.s.ImageService : map image written to C:\maps\P456.png";
        assert_eq!(
            extract_image_path(line).as_deref(),
            Some(r"C:\maps\P456.png")
        );

        // Same path, different logger: not the correlated line.
        let other = r"2024-01-01 10:00:05.000 - INFO 123 [http-1] a.OtherService : wrote C:\maps\P456.png";
        assert_eq!(extract_image_path(other), None);
    }

    #[test]
    fn test_block_markers_have_expected_shape() {
        assert_eq!(BLOCK_CLOSE.len(), 39);
        assert!(BLOCK_CLOSE.chars().all(|c| c == '/'));
        assert_eq!(
            BLOCK_OPEN_FIND_SAVE,
            format!("{0}FindSaveRequest{0}", "/".repeat(12))
        );
        assert_eq!(
            BLOCK_OPEN_MAP_IMAGE,
            format!("{0}GetMapImageRequest{0}", "/".repeat(12))
        );
    }
}
