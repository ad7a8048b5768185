//! Handles control messages sent by the peer

use crate::protocol::{parse_inbound, ControlMessage, Inbound};
use axum::extract::ws::Message;
use futures_util::{Stream, StreamExt};
use soundtrap_core::SharedFlags;
use tokio::sync::mpsc;

/// Why the request handler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerExit {
    /// Close frame received or the stream ended
    PeerClosed,
    /// The transport reported an error
    TransportError,
}

/// Consume inbound frames in arrival order until the peer goes away
///
/// Acknowledgements are handed to the notifier, which owns the sending half.
pub async fn run_request_handler<R, E>(
    mut inbound: R,
    flags: SharedFlags,
    acks: mpsc::UnboundedSender<ControlMessage>,
) -> HandlerExit
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(Message::Text(text)) => match parse_inbound(text.as_str()) {
                Inbound::DownloadEnable(value) => {
                    flags.set_download_enabled(value);
                    tracing::info!(download_enabled = value, "Download flag updated");
                    if acks.send(ControlMessage::DownloadEnable { value }).is_err() {
                        tracing::debug!("Notifier gone, acknowledgement dropped");
                    }
                }
                Inbound::Unknown(kind) => {
                    tracing::warn!(%kind, "Ignoring unsupported message");
                }
                Inbound::Invalid(reason) => {
                    tracing::warn!(%reason, "Ignoring malformed message");
                }
            },
            Ok(Message::Binary(bytes)) => {
                tracing::warn!(len = bytes.len(), "Ignoring binary frame from peer");
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "Peer closed connection");
                return HandlerExit::PeerClosed;
            }
            // Ping/pong are answered by the transport
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket receive error");
                return HandlerExit::TransportError;
            }
        }
    }
    HandlerExit::PeerClosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn text(s: &str) -> Result<Message, std::io::Error> {
        Ok(Message::Text(s.to_string().into()))
    }

    #[tokio::test]
    async fn test_download_enable_sets_flag_and_acks() {
        let flags = SharedFlags::default();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let frames = stream::iter(vec![
            text(r#"{"event_id":"downloadEnable","value":true}"#),
            text(r#"{"event_id":"downloadEnable","value":false}"#),
            text(r#"{"event_id":"downloadEnable","value":true}"#),
        ]);

        let exit = run_request_handler(frames, flags.clone(), ack_tx).await;
        assert_eq!(exit, HandlerExit::PeerClosed);
        assert!(flags.download_enabled());

        let acks: Vec<bool> = std::iter::from_fn(|| ack_rx.try_recv().ok())
            .map(|ack| match ack {
                ControlMessage::DownloadEnable { value } => value,
                other => panic!("unexpected ack {:?}", other),
            })
            .collect();
        assert_eq!(acks, vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_messages_are_ignored() {
        let flags = SharedFlags::default();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let frames = stream::iter(vec![
            text(r#"{"event_id":"selfDestruct"}"#),
            text("not json"),
            Ok(Message::Binary(vec![1u8, 2, 3].into())),
            text(r#"{"event_id":"downloadEnable","value":true}"#),
        ]);

        run_request_handler(frames, flags.clone(), ack_tx).await;
        assert!(flags.download_enabled());
        assert!(matches!(
            ack_rx.try_recv(),
            Ok(ControlMessage::DownloadEnable { value: true })
        ));
        assert!(ack_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_frame_stops_handler() {
        let flags = SharedFlags::default();
        let (ack_tx, _ack_rx) = mpsc::unbounded_channel();
        let frames = stream::iter(vec![
            Ok(Message::Close(None)),
            text(r#"{"event_id":"downloadEnable","value":true}"#),
        ]);

        let exit = run_request_handler(frames, flags.clone(), ack_tx).await;
        assert_eq!(exit, HandlerExit::PeerClosed);
        // Nothing after the close frame is processed
        assert!(!flags.download_enabled());
    }

    #[tokio::test]
    async fn test_transport_error_stops_handler() {
        let flags = SharedFlags::default();
        let (ack_tx, _ack_rx) = mpsc::unbounded_channel();
        let frames = stream::iter(vec![
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            text(r#"{"event_id":"downloadEnable","value":true}"#),
        ]);

        let exit = run_request_handler(frames, flags.clone(), ack_tx).await;
        assert_eq!(exit, HandlerExit::TransportError);
        assert!(!flags.download_enabled());
    }
}
