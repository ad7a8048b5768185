//! Control message protocol
//!
//! JSON text frames tagged by `event_id`. A file transfer is an
//! `audioFileSent` text frame immediately followed by one binary frame with
//! the file contents.

use serde::{Deserialize, Serialize};
use soundtrap_core::EngineEvent;

/// Control messages exchanged with the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_id")]
pub enum ControlMessage {
    /// A capture window was opened
    #[serde(rename = "soundActivity")]
    SoundActivity {
        activity_score: f64,
        activity_threshold: f64,
        buffer_id_start: usize,
        #[serde(alias = "insertion point")]
        insertion_point: usize,
        nr_runs: u64,
    },

    /// A capture file was written
    #[serde(rename = "audioFileCreated")]
    AudioFileCreated { nr_runs: u64, audio_file: String },

    /// Header for the binary frame that follows
    #[serde(rename = "audioFileSent")]
    AudioFileSent { audio_file: String },

    /// Peer request to enable or disable transfers; echoed as acknowledgement
    #[serde(rename = "downloadEnable")]
    DownloadEnable { value: bool },
}

impl ControlMessage {
    pub fn to_json(&self) -> String {
        // Serializing plain fields cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One WebSocket frame to send
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Frames announcing an engine event, in send order
pub fn frames_for(event: EngineEvent) -> Vec<Frame> {
    match event {
        EngineEvent::ActivityDetected {
            score,
            threshold,
            start_slot,
            insertion_point,
            run_index,
        } => vec![Frame::Text(
            ControlMessage::SoundActivity {
                activity_score: score,
                activity_threshold: threshold,
                buffer_id_start: start_slot,
                insertion_point,
                nr_runs: run_index,
            }
            .to_json(),
        )],
        EngineEvent::FileCreated { run_index, file } => vec![Frame::Text(
            ControlMessage::AudioFileCreated {
                nr_runs: run_index,
                audio_file: file.display().to_string(),
            }
            .to_json(),
        )],
        EngineEvent::FileTransferReady { file, bytes } => vec![
            Frame::Text(
                ControlMessage::AudioFileSent {
                    audio_file: file.display().to_string(),
                }
                .to_json(),
            ),
            Frame::Binary(bytes),
        ],
    }
}

/// Result of parsing an inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    DownloadEnable(bool),
    /// Well-formed message of a kind this server does not handle
    Unknown(String),
    /// Not a control message at all
    Invalid(String),
}

/// Classify an inbound text frame
pub fn parse_inbound(text: &str) -> Inbound {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Inbound::Invalid(format!("not JSON: {}", e)),
    };
    let Some(kind) = value.get("event_id").and_then(|k| k.as_str()) else {
        return Inbound::Invalid("missing event_id".to_string());
    };
    let kind = kind.to_string();

    match serde_json::from_value::<ControlMessage>(value) {
        Ok(ControlMessage::DownloadEnable { value }) => Inbound::DownloadEnable(value),
        Ok(_) => Inbound::Unknown(kind),
        Err(_) if kind == "downloadEnable" => {
            Inbound::Invalid("downloadEnable needs a boolean value".to_string())
        }
        Err(_) => Inbound::Unknown(kind),
    }
}
