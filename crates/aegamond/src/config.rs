//! Configuration management for aegamond.
//!
//! Loads settings from /etc/aegamon/config.toml (or the path in
//! AEGAMON_CONFIG) and falls back to compiled defaults for anything
//! missing. A broken config file is a warning, never a startup failure.

use aegamon_common::Endpoint;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/aegamon/config.toml";

/// Environment override for the config file location
pub const CONFIG_ENV: &str = "AEGAMON_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Log file written by the Aega tomcat application
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Address the HTTP/WebSocket server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Windows application server probe URL
    #[serde(default = "default_window_server_url")]
    pub window_server_url: String,

    /// Nginx load balancer probe URL
    #[serde(default = "default_nginx_url")]
    pub nginx_url: String,

    /// Seconds between health check passes
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// Per-probe timeout in seconds
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    /// Log file poll cadence in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Broadcast debounce window in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Seconds between request-rate summary points
    #[serde(default = "default_summary_interval")]
    pub summary_interval_secs: u64,

    /// Only paths inside this root may be revealed via the folder-open action
    #[serde(default = "default_allowed_open_root")]
    pub allowed_open_root: PathBuf,

    /// Linux analysis fleet, probed over raw TCP
    #[serde(default = "default_linux_servers")]
    pub linux_servers: Vec<Endpoint>,
}

fn default_log_path() -> PathBuf {
    PathBuf::from(r"C:\tomcat-8.5.82\golfApp\webapps\logs\AegaServerLog.log")
}

fn default_bind_addr() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_window_server_url() -> String {
    "http://192.168.1.1:8081/noAuth/test".to_string()
}

fn default_nginx_url() -> String {
    "http://192.168.1.5:7777/health".to_string()
}

fn default_health_interval() -> u64 {
    300
}

fn default_health_timeout() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    1
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_summary_interval() -> u64 {
    60
}

fn default_allowed_open_root() -> PathBuf {
    PathBuf::from(r"C:\tomcat-8.5.82\golfApp\webapps")
}

/// The analysis fleet from nginx.conf: linux01..linux25 on consecutive
/// addresses and ports.
fn default_linux_servers() -> Vec<Endpoint> {
    (0u16..25)
        .map(|i| {
            Endpoint::new(
                format!("linux{:02}", i + 1),
                format!("192.168.1.{}", 11 + i),
                7011 + i,
            )
        })
        .collect()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            bind_addr: default_bind_addr(),
            window_server_url: default_window_server_url(),
            nginx_url: default_nginx_url(),
            health_interval_secs: default_health_interval(),
            health_timeout_secs: default_health_timeout(),
            poll_interval_secs: default_poll_interval(),
            debounce_ms: default_debounce_ms(),
            summary_interval_secs: default_summary_interval(),
            allowed_open_root: default_allowed_open_root(),
            linux_servers: default_linux_servers(),
        }
    }
}

impl MonitorConfig {
    /// Load from AEGAMON_CONFIG or the default path, or fall back to defaults.
    pub fn load() -> Self {
        let path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(contents) => match toml::from_str::<MonitorConfig>(&contents) {
                    Ok(config) => {
                        info!("Loaded configuration from {}", path.display());
                        return config;
                    }
                    Err(err) => {
                        warn!(
                            "Failed to parse {}: {}. Using defaults.",
                            path.display(),
                            err
                        );
                    }
                },
                Err(err) => {
                    warn!(
                        "Failed to read {}: {}. Using defaults.",
                        path.display(),
                        err
                    );
                }
            }
        }

        Self::default()
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roster_covers_whole_fleet() {
        let config = MonitorConfig::default();

        assert_eq!(config.linux_servers.len(), 25);
        assert_eq!(config.linux_servers[0].id, "linux01");
        assert_eq!(config.linux_servers[0].host, "192.168.1.11");
        assert_eq!(config.linux_servers[0].port, 7011);
        assert_eq!(config.linux_servers[24].id, "linux25");
        assert_eq!(config.linux_servers[24].host, "192.168.1.35");
        assert_eq!(config.linux_servers[24].port, 7035);
    }

    #[test]
    fn test_partial_toml_fills_remaining_defaults() {
        let config: MonitorConfig = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:8080"
            health_interval_secs = 30

            [[linux_servers]]
            id = "linux01"
            host = "10.0.0.1"
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.health_interval_secs, 30);
        assert_eq!(config.linux_servers.len(), 1);
        // Untouched fields keep their defaults.
        assert_eq!(config.debounce_ms, 200);
        assert_eq!(config.poll_interval_secs, 1);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = MonitorConfig::load_from(Path::new("/definitely/not/here.toml"));
        assert_eq!(config.bind_addr, default_bind_addr());
    }
}
