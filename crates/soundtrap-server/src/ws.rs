//! WebSocket capture sessions
//!
//! One connection, one capture engine. The engine runs on its own thread;
//! the notifier task owns the sending half of the socket and the request
//! task owns the receiving half.

use crate::notifier::{run_notifier, NotifierExit};
use crate::requests::run_request_handler;
use crate::AppState;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::StreamExt;
use soundtrap_core::{CaptureRunner, EventBus, SharedFlags, WavSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a stopping session waits for its last events to reach the peer
const NOTIFIER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// What ended a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    PeerGone,
    EngineStopped,
    ServerShutdown,
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    if state.is_shutting_down() {
        reject(socket, close_code::AWAY, "server shutting down").await;
        return;
    }
    let Some(guard) = state.sessions.try_register() else {
        tracing::warn!(
            max_sessions = state.sessions.max_sessions(),
            "Rejecting connection, session limit reached"
        );
        reject(socket, close_code::AGAIN, "session limit reached").await;
        return;
    };
    let session = guard.id();

    let flags = SharedFlags::new(false);
    let (bus, events) = EventBus::with_history(Arc::clone(&state.history));
    let mut runner = match CaptureRunner::spawn(
        state.session_config(session),
        Arc::clone(&state.source_factory),
        Box::new(WavSink::new()),
        bus,
        flags.clone(),
    ) {
        Ok(runner) => runner,
        Err(e) => {
            tracing::error!(session, error = %e, "Failed to start capture engine");
            reject(socket, close_code::ERROR, "capture engine failed to start").await;
            return;
        }
    };
    guard.attach(runner.shared_stats());
    tracing::info!(session, "Capture session started");

    let (sender, receiver) = socket.split();
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();
    let mut notify_task = tokio::spawn(run_notifier(events, ack_rx, sender));
    let mut request_task = tokio::spawn(run_request_handler(receiver, flags, ack_tx));
    let mut shutdown = state.shutdown_signal();

    let end = tokio::select! {
        exit = &mut request_task => {
            tracing::debug!(session, ?exit, "Request handler finished");
            SessionEnd::PeerGone
        }
        exit = &mut notify_task => match exit {
            Ok(NotifierExit::EngineStopped) => SessionEnd::EngineStopped,
            _ => SessionEnd::PeerGone,
        },
        _ = shutdown.wait_for(|stop| *stop) => SessionEnd::ServerShutdown,
    };

    // Flushes the open window before the thread exits
    let reason = tokio::task::spawn_blocking(move || runner.stop())
        .await
        .ok()
        .flatten();

    match end {
        SessionEnd::ServerShutdown => {
            // Remaining events and the close frame still go out
            if tokio::time::timeout(NOTIFIER_DRAIN_TIMEOUT, &mut notify_task)
                .await
                .is_err()
            {
                tracing::warn!(session, "Peer did not take final events in time");
                notify_task.abort();
            }
        }
        SessionEnd::PeerGone => notify_task.abort(),
        SessionEnd::EngineStopped => {}
    }
    request_task.abort();

    tracing::info!(session, ?end, ?reason, "Capture session ended");
    drop(guard);
}

async fn reject(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Rejection not delivered");
    }
}
