//! State aggregation - the single writer of `SystemState`.
//!
//! Every inbound fact (parsed log event, probe report, summary tick) lands
//! here as one synchronous mutation. Callers hold the aggregator behind the
//! server's `Arc<RwLock<_>>`, so observers never see a half-applied change.
//! Each mutation reports whether it is worth broadcasting; the dispatcher
//! debounces from there.

use aegamon_common::{
    EndpointStatus, ProbeStatus, RecentLogEntry, PendingImageRequest, ServerStatus, SummaryPoint,
    SystemState,
};
use chrono::{Local, Utc};

use crate::grammar::{
    FindSaveEvent, ImagePathEvent, LineEvent, LogEvent, LoginOutcome, MapImageEvent,
};

pub struct Aggregator {
    state: SystemState,
}

impl Aggregator {
    pub fn new(roster_size: usize) -> Self {
        Self {
            state: SystemState::new(roster_size),
        }
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    /// Apply one parsed log event. Returns whether viewers should be told.
    pub fn apply_event(&mut self, event: &LogEvent) -> bool {
        match event {
            LogEvent::Line(line) => {
                self.apply_line(line);
                true
            }
            LogEvent::FindSave(found) => {
                self.apply_find_save(found);
                true
            }
            LogEvent::MapImage(map) => {
                self.apply_map_image(map);
                true
            }
            LogEvent::ImagePath(path) => self.apply_image_path(path),
        }
    }

    fn apply_line(&mut self, line: &LineEvent) {
        let now = Utc::now();
        self.state.global.total_log_lines += 1;
        self.state.global.last_update = Some(now);
        if line.is_error_level() {
            self.state.global.error_count += 1;
        }

        // Only lines naming a hole/camera are attributed to a unit record.
        let mut server_label = line.logger.clone();
        if let Some(camera) = line.camera {
            let key = camera.to_string();
            server_label.clone_from(&key);

            let record = self.state.server_record(&key);
            record.request_count += 1;
            record.last_activity = Some(now);

            if line.is_error_level() {
                record.status = ServerStatus::Error;
                record.error_count += 1;
            } else if line.login == Some(LoginOutcome::Success) {
                record.status = ServerStatus::Idle;
            } else if !line.durations_ms.is_empty() {
                record.status = ServerStatus::Analyzing;
            }

            for &millis in &line.durations_ms {
                record.record_processing_time(millis);
            }
        }

        let mut entry = RecentLogEntry::new(
            line.timestamp.clone(),
            line.level.clone(),
            server_label,
            line.message.clone(),
        );
        entry.device_ip = line.device_ip.clone();
        self.state.push_recent_log(entry);
    }

    fn apply_find_save(&mut self, event: &FindSaveEvent) {
        self.state.global.total_log_lines += 1;
        self.state.global.last_update = Some(event.timestamp);

        if let Some(key) = event.camera_key() {
            let record = self.state.server_record(&key);
            record.request_count += 1;
            record.success_count += 1;
            record.status = ServerStatus::Found;
            record.last_activity = Some(event.timestamp);
        }

        let mut entry = RecentLogEntry::new(
            event
                .timestamp
                .with_timezone(&Local)
                .format("%H:%M:%S")
                .to_string(),
            "INFO",
            event.server.clone(),
            event
                .message
                .clone()
                .unwrap_or_else(|| "Ball found".to_string()),
        );
        entry.matching_result = Some(event.matching_result.clone());
        self.state.push_recent_log(entry);
    }

    fn apply_map_image(&mut self, event: &MapImageEvent) {
        self.state.global.total_log_lines += 1;
        self.state.global.last_update = Some(event.timestamp);

        self.state.insert_pending_image(PendingImageRequest {
            play_id: event.play_id.clone(),
            glcr: event.glcr.clone(),
            golf_cours_id: event.golf_cours_id.clone(),
            hole_no: event.hole_no.clone(),
            kiosk_ty_code: event.kiosk_ty_code.clone(),
            requested_at: event.timestamp,
            image_path: None,
        });

        let entry = RecentLogEntry::new(
            event
                .timestamp
                .with_timezone(&Local)
                .format("%H:%M:%S")
                .to_string(),
            "INFO",
            "N/A",
            format!("Map image requested for play {}", event.play_id),
        );
        self.state.push_recent_log(entry);
    }

    /// The request may have aged out of the bounded map; that is a silent
    /// drop, not an error.
    fn apply_image_path(&mut self, event: &ImagePathEvent) -> bool {
        self.state.resolve_image_path(&event.play_id, &event.path)
    }

    /// Write-if-changed so a steady probe does not cause needless pushes.
    pub fn apply_http_status(&mut self, name: &str, status: ProbeStatus) -> bool {
        let statuses = &mut self.state.global.http_endpoint_statuses;
        if statuses.get(name) == Some(&status) {
            return false;
        }
        statuses.insert(name.to_string(), status);
        true
    }

    /// Replace the roster detail array wholesale. The derived counts follow
    /// from the details, so an unchanged array means nothing to broadcast.
    pub fn apply_roster(&mut self, details: Vec<EndpointStatus>) -> bool {
        if self.state.global.linux_fleet.details == details {
            return false;
        }
        self.state.global.linux_fleet.replace_details(details);
        true
    }

    /// Append one request-rate point labeled with the current minute.
    pub fn record_summary_point(&mut self, label: impl Into<String>) -> bool {
        let requests = self.state.servers.values().map(|r| r.request_count).sum();
        self.state.push_summary_point(SummaryPoint {
            time: label.into(),
            requests,
        });
        true
    }
}
