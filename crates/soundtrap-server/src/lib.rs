//! Soundtrap Server - WebSocket capture sessions over Axum
//!
//! Every WebSocket connection runs its own capture engine. Engine events are
//! pushed to the peer as JSON control messages (plus a binary frame per
//! transferred file); the peer can switch file transfers on and off.
//! A small REST API under `/api/v1/` reports status, configuration and the
//! recent event history.

pub mod api;
pub mod notifier;
pub mod protocol;
pub mod registry;
pub mod requests;
pub mod ws;

use axum::http::{header, HeaderValue};
use axum::Router;
use chrono::{DateTime, Utc};
use registry::SessionRegistry;
use serde::{Deserialize, Serialize};
use soundtrap_core::{CaptureConfig, ConfigError, EventHistory, SharedHistory, SourceFactory};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

/// How long shutdown waits for sessions to flush their windows
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while loading server settings
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_max_sessions() -> usize {
    1
}

/// Server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_addr", alias = "host")]
    pub bind_addr: String,
    /// Port to listen on
    #[serde(default = "default_port", alias = "ws_port")]
    pub port: u16,
    /// Concurrent capture sessions; the input device is usually exclusive
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Server and capture settings read from one JSON file
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(flatten)]
    pub server: ServerConfig,
    #[serde(flatten)]
    pub capture: CaptureConfig,
}

impl Settings {
    /// Load and validate a settings file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = serde_json::from_str(&contents).map_err(ConfigError::from)?;
        settings.validate()?;
        tracing::info!(path = %path.display(), "Loaded server settings");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.capture.validate()?;
        if self.server.max_sessions == 0 {
            return Err(SettingsError::Invalid {
                field: "max_sessions",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.server.bind_addr.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "bind_addr",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Capture configuration each session starts from
    pub capture: Arc<CaptureConfig>,
    /// Builds a fresh sample source for every session
    pub source_factory: SourceFactory,
    /// Recent events across all sessions
    pub history: SharedHistory,
    /// Active capture sessions
    pub sessions: Arc<SessionRegistry>,
    pub started_at: DateTime<Utc>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(config: ServerConfig, capture: CaptureConfig, source_factory: SourceFactory) -> Self {
        let history = Arc::new(Mutex::new(EventHistory::new(capture.recent_events)));
        let sessions = Arc::new(SessionRegistry::new(config.max_sessions));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            capture: Arc::new(capture),
            source_factory,
            history,
            sessions,
            started_at: Utc::now(),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Ask the server and every session to stop
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver that flips to `true` on shutdown
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Capture configuration for one session
    ///
    /// With more than one session allowed, each writes into its own
    /// `session_<id>` directory next to the configured output file.
    pub fn session_config(&self, session: u64) -> CaptureConfig {
        let mut config = (*self.capture).clone();
        if self.config.max_sessions > 1 {
            if let Some(name) = config.output_file.file_name().map(|n| n.to_os_string()) {
                let dir = config
                    .output_file
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                config.output_file = dir.join(format!("session_{}", session)).join(name);
            }
        }
        config
    }
}

/// Build the Axum router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // WebSocket capture sessions
        .route("/", axum::routing::get(ws::ws_handler))
        .route("/api/v1/ws", axum::routing::get(ws::ws_handler))
        // REST API
        .route("/api/v1/status", axum::routing::get(api::get_status))
        .route("/api/v1/config", axum::routing::get(api::get_config))
        .route("/api/v1/events", axum::routing::get(api::get_events))
        .route(
            "/api/v1/remote-url",
            axum::routing::get(api::get_remote_url),
        )
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

/// Serve on an already bound listener until shutdown is requested
///
/// Returns once open sessions have flushed (or the drain timeout passed).
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Soundtrap server listening");

    let mut shutdown = state.shutdown_signal();
    let app = build_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    tracing::info!(active = state.sessions.active(), "Waiting for sessions to finish");
    if !state.sessions.wait_idle(SESSION_DRAIN_TIMEOUT).await {
        tracing::warn!(
            active = state.sessions.active(),
            "Sessions still running after drain timeout"
        );
    }
    tracing::info!("Soundtrap server stopped");
    Ok(())
}

/// Start the server on the configured address; Ctrl+C stops it gracefully
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind_addr, state.config.port);
    let listener = TcpListener::bind(&addr).await?;

    let signal_state = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, shutting down");
            signal_state.request_shutdown();
        }
    });

    serve(listener, state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use soundtrap_core::{SampleSource, SourceError};
    use std::path::PathBuf;

    fn state(max_sessions: usize) -> AppState {
        let factory: SourceFactory = Arc::new(|| -> Result<Box<dyn SampleSource>, SourceError> {
            Err(SourceError::NoInput)
        });
        let capture = CaptureConfig {
            output_file: PathBuf::from("rec/sound.wav"),
            ..Default::default()
        };
        AppState::new(
            ServerConfig {
                max_sessions,
                ..Default::default()
            },
            capture,
            factory,
        )
    }

    #[test]
    fn test_settings_accept_legacy_keys() {
        let json = r#"{
            "host": "127.0.0.1",
            "ws_port": 9000,
            "nr_buffers": 6,
            "nr_records_to_file": 2,
            "samplerate_hz": 16000,
            "chunk_mod": 4
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.server.bind_addr, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.max_sessions, 1);
        assert_eq!(settings.capture.buffer_count, 6);
        assert_eq!(settings.capture.record_count, 2);
        assert_eq!(settings.capture.sample_rate, 16000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.server.max_sessions = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid {
                field: "max_sessions",
                ..
            })
        ));

        settings.server.max_sessions = 1;
        settings.capture.record_count = settings.capture.buffer_count + 1;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Config(
                ConfigError::RecordCountExceedsBuffers { .. }
            ))
        ));
    }

    #[test]
    fn test_settings_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"port": 9100, "buffer_count": 4, "record_count": 4}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.capture.record_count, 4);

        assert!(Settings::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_session_config_single_session_keeps_path() {
        let state = state(1);
        assert_eq!(
            state.session_config(3).output_file,
            PathBuf::from("rec/sound.wav")
        );
    }

    #[test]
    fn test_session_config_separates_sessions() {
        let state = state(2);
        assert_eq!(
            state.session_config(3).output_file,
            PathBuf::from("rec/session_3/sound.wav")
        );
    }

    #[test]
    fn test_shutdown_signal() {
        let state = state(1);
        let rx = state.shutdown_signal();
        assert!(!state.is_shutting_down());
        state.request_shutdown();
        assert!(state.is_shutting_down());
        assert!(*rx.borrow());
    }
}
