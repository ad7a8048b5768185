//! REST API endpoints

use crate::registry::SessionSummary;
use crate::{AppState, ServerConfig};
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use soundtrap_core::{CaptureConfig, EventRecord, BUILD_DATE, VERSION};

/// Server status response
#[derive(Serialize, Debug)]
pub struct StatusResponse {
    pub version: String,
    pub build_date: String,
    pub uptime_seconds: i64,
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub sessions: Vec<SessionSummary>,
}

/// Effective configuration response
#[derive(Serialize, Debug)]
pub struct ConfigResponse {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
}

/// Remote URL response
#[derive(Serialize, Debug)]
pub struct RemoteUrlResponse {
    pub url: String,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let sessions = state.sessions.summaries();
    Json(StatusResponse {
        version: VERSION.to_string(),
        build_date: BUILD_DATE.to_string(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        active_sessions: sessions.len(),
        max_sessions: state.sessions.max_sessions(),
        sessions,
    })
}

/// GET /api/v1/config
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        server: state.config.clone(),
        capture: (*state.capture).clone(),
    })
}

/// GET /api/v1/events - most recent events, oldest first
pub async fn get_events(State(state): State<AppState>) -> Json<Vec<EventRecord>> {
    let records = state
        .history
        .lock()
        .map(|h| h.snapshot())
        .unwrap_or_default();
    Json(records)
}

/// GET /api/v1/remote-url - WebSocket URL for peers on the local network
pub async fn get_remote_url(State(state): State<AppState>) -> Json<RemoteUrlResponse> {
    let ip = local_ip_address::local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| "localhost".to_string());
    Json(RemoteUrlResponse {
        url: format!("ws://{}:{}", ip, state.config.port),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use soundtrap_core::{EngineEvent, EventBus, SampleSource, SourceError, SourceFactory};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let factory: SourceFactory = Arc::new(|| -> Result<Box<dyn SampleSource>, SourceError> {
            Err(SourceError::NoInput)
        });
        AppState::new(ServerConfig::default(), CaptureConfig::default(), factory)
    }

    #[tokio::test]
    async fn test_status_without_sessions() {
        let state = test_state();
        let Json(status) = get_status(State(state)).await;
        assert_eq!(status.version, VERSION);
        assert_eq!(status.active_sessions, 0);
        assert_eq!(status.max_sessions, 1);
        assert!(status.sessions.is_empty());
        assert!(status.uptime_seconds >= 0);
    }

    #[tokio::test]
    async fn test_status_lists_registered_sessions() {
        let state = test_state();
        let _guard = state.sessions.try_register().unwrap();
        let Json(status) = get_status(State(state)).await;
        assert_eq!(status.active_sessions, 1);
        assert_eq!(status.sessions[0].id, 1);
    }

    #[tokio::test]
    async fn test_events_reflect_shared_history() {
        let state = test_state();
        let (bus, _events) = EventBus::with_history(Arc::clone(&state.history));
        bus.emit(EngineEvent::FileCreated {
            run_index: 4,
            file: PathBuf::from("rec/sound_run_4.wav"),
        });

        let Json(records) = get_events(State(state)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].run_index, Some(4));
    }

    #[tokio::test]
    async fn test_config_response_serialization() {
        let Json(config) = get_config(State(test_state())).await;
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["server"]["port"], 8765);
        assert_eq!(json["capture"]["buffer_count"], config.capture.buffer_count);
    }

    #[tokio::test]
    async fn test_remote_url_uses_ws_port() {
        let Json(remote) = get_remote_url(State(test_state())).await;
        assert!(remote.url.starts_with("ws://"));
        assert!(remote.url.ends_with(":8765"));
    }
}
