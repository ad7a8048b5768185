//! Forwards engine events and request acknowledgements to the peer

use crate::protocol::{frames_for, ControlMessage, Frame};
use axum::extract::ws::{close_code, CloseFrame, Message};
use futures_util::{Sink, SinkExt};
use soundtrap_core::EventStream;
use tokio::sync::mpsc;

/// Why the notifier stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierExit {
    /// Event stream ended and a close frame was sent
    EngineStopped,
    /// Sending to the peer failed
    ConnectionClosed,
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

/// Single consumer of the session's event stream
///
/// Every event becomes one or more frames, sent in emission order; a
/// transfer's header and payload are sent back to back. When the stream ends
/// the peer gets a normal close frame.
pub async fn run_notifier<S>(
    mut events: EventStream,
    mut acks: mpsc::UnboundedReceiver<ControlMessage>,
    mut sink: S,
) -> NotifierExit
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    tracing::info!("Event stream ended, closing connection");
                    let close = Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "capture stopped".into(),
                    }));
                    if let Err(e) = sink.send(close).await {
                        tracing::debug!(error = %e, "Close frame not delivered");
                    }
                    return NotifierExit::EngineStopped;
                };

                let kind = event.kind();
                for frame in frames_for(event) {
                    if let Err(e) = sink.send(to_message(frame)).await {
                        tracing::warn!(?kind, error = %e, "Peer connection closed while sending");
                        return NotifierExit::ConnectionClosed;
                    }
                }
                tracing::debug!(?kind, "Event sent to peer");
            }
            Some(ack) = acks.recv() => {
                if let Err(e) = sink.send(Message::Text(ack.to_json().into())).await {
                    tracing::warn!(error = %e, "Peer connection closed while acknowledging");
                    return NotifierExit::ConnectionClosed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soundtrap_core::{EngineEvent, EventBus};
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Peer that has already gone away
    struct ResetSink;

    impl Sink<Message> for ResetSink {
        type Error = &'static str;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Err("connection reset"))
        }

        fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
            Err("connection reset")
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn text(msg: &Message) -> serde_json::Value {
        match msg {
            Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_events_forwarded_in_order_then_closed() {
        let (bus, events) = EventBus::new(8);
        let (_ack_tx, ack_rx) = mpsc::unbounded_channel();

        bus.emit(EngineEvent::ActivityDetected {
            score: 10.0,
            threshold: 5.0,
            start_slot: 0,
            insertion_point: 50,
            run_index: 0,
        });
        bus.emit(EngineEvent::FileCreated {
            run_index: 0,
            file: PathBuf::from("s_run_0.wav"),
        });
        bus.emit(EngineEvent::FileTransferReady {
            file: PathBuf::from("s_run_0.wav"),
            bytes: vec![9, 8, 7],
        });
        drop(bus);

        let mut sent: Vec<Message> = Vec::new();
        let exit = run_notifier(events, ack_rx, &mut sent).await;
        assert_eq!(exit, NotifierExit::EngineStopped);

        assert_eq!(sent.len(), 5);
        assert_eq!(text(&sent[0])["event_id"], "soundActivity");
        assert_eq!(text(&sent[1])["event_id"], "audioFileCreated");
        assert_eq!(text(&sent[2])["event_id"], "audioFileSent");
        assert!(matches!(&sent[3], Message::Binary(b) if b.to_vec() == vec![9u8, 8, 7]));
        assert!(matches!(&sent[4], Message::Close(Some(_))));
    }

    #[tokio::test]
    async fn test_acks_are_forwarded() {
        let (bus, events) = EventBus::new(8);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        ack_tx
            .send(ControlMessage::DownloadEnable { value: true })
            .unwrap();

        let task = tokio::spawn(async move {
            let mut sent: Vec<Message> = Vec::new();
            run_notifier(events, ack_rx, &mut sent).await;
            sent
        });
        // Let the ack go out before the stream ends
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(bus);

        let sent = task.await.unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(text(&sent[0])["event_id"], "downloadEnable");
        assert_eq!(text(&sent[0])["value"], true);
    }

    #[tokio::test]
    async fn test_send_failure_reports_closed_connection() {
        let (bus, events) = EventBus::new(8);
        let (_ack_tx, ack_rx) = mpsc::unbounded_channel();
        bus.emit(EngineEvent::FileCreated {
            run_index: 1,
            file: PathBuf::from("x.wav"),
        });

        let exit = run_notifier(events, ack_rx, ResetSink).await;
        assert_eq!(exit, NotifierExit::ConnectionClosed);
    }
}
