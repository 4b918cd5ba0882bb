//! The aggregate monitoring model pushed to viewers.
//!
//! All structs serialize with camelCase keys - that is the shape the
//! dashboard consumes, and renaming a field here is a wire-format break.
//! Every collection in the model is bounded; the caps live here next to
//! the types they protect.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

use crate::endpoint::Endpoint;

/// Retained entries in the recent-log feed.
pub const RECENT_LOG_CAP: usize = 50;
/// Retained processing-time samples per server record.
pub const PROCESSING_WINDOW: usize = 10;
/// Retained unresolved map-image requests.
pub const PENDING_IMAGE_CAP: usize = 100;
/// Retained points in the request-rate series.
pub const SUMMARY_CAP: usize = 60;

/// Latest reachability verdict for a probed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Active,
    Error,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

/// Probe outcome for one roster entry, replaced wholesale each cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub status: ProbeStatus,
}

impl EndpointStatus {
    pub fn new(endpoint: &Endpoint, status: ProbeStatus) -> Self {
        Self {
            id: endpoint.id.clone(),
            host: endpoint.host.clone(),
            port: endpoint.port,
            status,
        }
    }
}

/// Lifecycle of one analysis unit as observed from the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Idle,
    Analyzing,
    Error,
    Found,
}

/// Per-unit record keyed by the composite `hole/camera` id.
///
/// Created on the first event naming its id, mutated in place afterwards,
/// never removed while the daemon runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: String,
    pub status: ServerStatus,
    pub last_activity: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub recent_processing_times: VecDeque<f64>,
    pub average_processing_time: f64,
}

impl ServerRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ServerStatus::Idle,
            last_activity: None,
            request_count: 0,
            success_count: 0,
            error_count: 0,
            recent_processing_times: VecDeque::new(),
            average_processing_time: 0.0,
        }
    }

    /// Append one duration sample, evicting the oldest beyond the window,
    /// and recompute the mean over exactly the retained samples.
    pub fn record_processing_time(&mut self, millis: f64) {
        self.recent_processing_times.push_back(millis);
        while self.recent_processing_times.len() > PROCESSING_WINDOW {
            self.recent_processing_times.pop_front();
        }
        let sum: f64 = self.recent_processing_times.iter().sum();
        self.average_processing_time = sum / self.recent_processing_times.len() as f64;
    }
}

/// One row of the recent-activity feed. `id` keys dashboard rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentLogEntry {
    pub id: String,
    pub time: String,
    pub level: String,
    pub server: String,
    pub message: String,
    pub matching_result: Option<String>,
    pub device_ip: Option<String>,
}

impl RecentLogEntry {
    pub fn new(
        time: impl Into<String>,
        level: impl Into<String>,
        server: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            time: time.into(),
            level: level.into(),
            server: server.into(),
            message: message.into(),
            matching_result: None,
            device_ip: None,
        }
    }
}

/// A map-image request waiting for its rendered image path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingImageRequest {
    pub play_id: String,
    pub glcr: Option<String>,
    pub golf_cours_id: Option<String>,
    pub hole_no: Option<String>,
    pub kiosk_ty_code: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub image_path: Option<String>,
}

/// One point of the rolling request-rate series graphed by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryPoint {
    pub time: String,
    pub requests: u64,
}

/// Aggregated reachability of the Linux analysis fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetState {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub issues: usize,
    pub details: Vec<EndpointStatus>,
}

impl FleetState {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            online: 0,
            offline: 0,
            issues: 0,
            details: Vec::new(),
        }
    }

    /// Replace the detail array wholesale and rederive the counts.
    pub fn replace_details(&mut self, details: Vec<EndpointStatus>) {
        self.total = details.len();
        self.online = details
            .iter()
            .filter(|d| d.status == ProbeStatus::Active)
            .count();
        self.offline = self.total - self.online;
        self.issues = self.offline;
        self.details = details;
    }
}

/// Fleet-wide counters and probe verdicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalState {
    pub total_log_lines: u64,
    pub error_count: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub http_endpoint_statuses: BTreeMap<String, ProbeStatus>,
    pub linux_fleet: FleetState,
}

/// Root aggregate: the full snapshot serialized to every viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemState {
    pub global: GlobalState,
    pub servers: BTreeMap<String, ServerRecord>,
    pub recent_logs: VecDeque<RecentLogEntry>,
    pub pending_image_requests: IndexMap<String, PendingImageRequest>,
    #[serde(rename = "kpiData")]
    pub summary: VecDeque<SummaryPoint>,
}

impl SystemState {
    pub fn new(roster_size: usize) -> Self {
        Self {
            global: GlobalState {
                total_log_lines: 0,
                error_count: 0,
                last_update: None,
                http_endpoint_statuses: BTreeMap::new(),
                linux_fleet: FleetState::new(roster_size),
            },
            servers: BTreeMap::new(),
            recent_logs: VecDeque::new(),
            pending_image_requests: IndexMap::new(),
            summary: VecDeque::new(),
        }
    }

    /// Locate or create the record for a composite `hole/camera` id.
    pub fn server_record(&mut self, id: &str) -> &mut ServerRecord {
        self.servers
            .entry(id.to_string())
            .or_insert_with(|| ServerRecord::new(id))
    }

    /// Append to the recent-log feed, evicting the oldest beyond the cap.
    pub fn push_recent_log(&mut self, entry: RecentLogEntry) {
        self.recent_logs.push_back(entry);
        while self.recent_logs.len() > RECENT_LOG_CAP {
            self.recent_logs.pop_front();
        }
    }

    /// Track a new map-image request. The map has no terminal event, so it
    /// is bounded by evicting the oldest entry beyond the cap.
    pub fn insert_pending_image(&mut self, request: PendingImageRequest) {
        self.pending_image_requests
            .insert(request.play_id.clone(), request);
        while self.pending_image_requests.len() > PENDING_IMAGE_CAP {
            self.pending_image_requests.shift_remove_index(0);
        }
    }

    /// Attach a rendered image path to its pending request, if still tracked.
    pub fn resolve_image_path(&mut self, play_id: &str, path: &str) -> bool {
        match self.pending_image_requests.get_mut(play_id) {
            Some(request) => {
                request.image_path = Some(path.to_string());
                true
            }
            None => false,
        }
    }

    /// Append one request-rate point, evicting the oldest beyond the window.
    pub fn push_summary_point(&mut self, point: SummaryPoint) {
        self.summary.push_back(point);
        while self.summary.len() > SUMMARY_CAP {
            self.summary.pop_front();
        }
    }
}
