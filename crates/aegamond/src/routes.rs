//! API routes for aegamond.
//!
//! Three small surfaces: the on-demand state query, the live WebSocket
//! feed, and the folder-open action the dashboard uses to jump to a saved
//! map image. Everything else viewers know arrives over the feed.

use crate::server::AppState;
use aegamon_common::SystemState;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

type AppStateArc = Arc<AppState>;

pub fn api_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/state", get(current_state))
        .route("/api/test", get(connectivity_test))
        .route("/api/open-folder", post(open_folder))
}

pub fn ws_routes() -> Router<AppStateArc> {
    Router::new().route("/ws", get(subscribe))
}

// ============================================================================
// State query
// ============================================================================

async fn current_state(State(state): State<AppStateArc>) -> Json<SystemState> {
    let aggregator = state.aggregator.read().await;
    Json(aggregator.state().clone())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoResponse {
    pub message: String,
    pub version: String,
    pub uptime_seconds: u64,
}

async fn connectivity_test(State(state): State<AppStateArc>) -> Json<EchoResponse> {
    Json(EchoResponse {
        message: "Hello from aegamond".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Live feed
// ============================================================================

async fn subscribe(State(state): State<AppStateArc>, ws: WebSocketUpgrade) -> Response {
    // Snapshot before the upgrade so a new viewer paints immediately,
    // independent of the debounce timer.
    let initial = {
        let aggregator = state.aggregator.read().await;
        serde_json::to_string(aggregator.state())
    };

    let initial = match initial {
        Ok(json) => json,
        Err(err) => {
            error!("failed serializing initial snapshot: {}", err);
            return (StatusCode::INTERNAL_SERVER_ERROR, "snapshot failed").into_response();
        }
    };

    let rx = state.dispatcher.subscribe();
    ws.on_upgrade(move |socket| push_state(socket, initial, rx))
}

async fn push_state(
    mut socket: WebSocket,
    initial: String,
    mut rx: broadcast::Receiver<Arc<String>>,
) {
    if socket.send(Message::Text(initial)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
            frame = rx.recv() => {
                match frame {
                    Ok(json) => {
                        if socket.send(Message::Text((*json).clone())).await.is_err() {
                            break;
                        }
                    }
                    // Frames are whole snapshots; whatever this viewer
                    // missed is superseded by the next one.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("viewer lagged, skipped {} frames", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    debug!("viewer disconnected");
}

// ============================================================================
// Folder-open action
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenFolderRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenFolderResponse {
    pub opened: String,
}

#[derive(Debug, Error)]
pub enum OpenFolderError {
    #[error("path is outside the allowed directory")]
    Forbidden,
    #[error("failed to open folder: {0}")]
    Action(String),
}

impl IntoResponse for OpenFolderError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Action(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

async fn open_folder(
    State(state): State<AppStateArc>,
    Json(request): Json<OpenFolderRequest>,
) -> Result<Json<OpenFolderResponse>, OpenFolderError> {
    let target = resolve_open_target(Path::new(&request.path), &state.config.allowed_open_root)?;

    info!("Revealing {} in the file manager", target.display());
    reveal_in_file_manager(&target).map_err(|err| OpenFolderError::Action(err.to_string()))?;

    Ok(Json(OpenFolderResponse {
        opened: target.display().to_string(),
    }))
}

/// Canonicalize both sides before the containment check: a plain string
/// prefix test would let `..` segments and symlinks escape the allowed
/// root. A path that cannot be canonicalized cannot be verified either,
/// so it is rejected the same way.
fn resolve_open_target(
    requested: &Path,
    allowed_root: &Path,
) -> Result<PathBuf, OpenFolderError> {
    let root = allowed_root
        .canonicalize()
        .map_err(|_| OpenFolderError::Forbidden)?;
    let resolved = requested
        .canonicalize()
        .map_err(|_| OpenFolderError::Forbidden)?;

    if !resolved.starts_with(&root) {
        return Err(OpenFolderError::Forbidden);
    }

    // Reveal the containing directory for file paths.
    if resolved.is_dir() {
        Ok(resolved)
    } else {
        match resolved.parent() {
            Some(parent) => Ok(parent.to_path_buf()),
            None => Ok(resolved),
        }
    }
}

fn reveal_in_file_manager(dir: &Path) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    std::process::Command::new("explorer").arg(dir).spawn()?;

    #[cfg(not(target_os = "windows"))]
    std::process::Command::new("xdg-open").arg(dir).spawn()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_target_inside_root_allowed() {
        let root = tempfile::tempdir().unwrap();
        let sub = root.path().join("maps");
        std::fs::create_dir(&sub).unwrap();

        let target = resolve_open_target(&sub, root.path()).unwrap();
        assert_eq!(target, sub.canonicalize().unwrap());
    }

    #[test]
    fn test_open_target_file_resolves_to_parent() {
        let root = tempfile::tempdir().unwrap();
        let sub = root.path().join("maps");
        std::fs::create_dir(&sub).unwrap();
        let file = sub.join("P1.png");
        std::fs::write(&file, b"png").unwrap();

        let target = resolve_open_target(&file, root.path()).unwrap();
        assert_eq!(target, sub.canonicalize().unwrap());
    }

    #[test]
    fn test_open_target_outside_root_forbidden() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();

        let result = resolve_open_target(elsewhere.path(), root.path());
        assert!(matches!(result, Err(OpenFolderError::Forbidden)));
    }

    #[test]
    fn test_open_target_traversal_forbidden() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("maps")).unwrap();
        // Resolves to the tempdir's parent: textually prefixed by the root,
        // but outside it once canonicalized.
        let sneaky = root.path().join("maps").join("..").join("..");

        let result = resolve_open_target(&sneaky, root.path());
        assert!(matches!(result, Err(OpenFolderError::Forbidden)));
    }

    #[test]
    fn test_open_target_nonexistent_forbidden() {
        let root = tempfile::tempdir().unwrap();
        let ghost = root.path().join("not").join("here.png");

        let result = resolve_open_target(&ghost, root.path());
        assert!(matches!(result, Err(OpenFolderError::Forbidden)));
    }
}
