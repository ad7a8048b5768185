//! WebSocket listening client
//!
//! Connects to a capture server, logs the events it announces and, with
//! downloads enabled, saves each transferred file under the name of the last
//! `audioFileCreated` announcement. Runs until the server closes the
//! connection.

use futures_util::{SinkExt, StreamExt};
use soundtrap_server::protocol::ControlMessage;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Download directory {0} does not exist")]
    MissingDownloadDir(PathBuf),

    #[error("Failed to connect to {uri}: {source}")]
    Connect {
        uri: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("WebSocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("Server refused to enable downloads")]
    DownloadRejected,

    #[error("Failed to save {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What to connect to and where downloads go
#[derive(Debug, Clone)]
pub struct ListenOptions {
    pub uri: String,
    pub download_dir: PathBuf,
    /// Ask the server to send every created file
    pub download: bool,
}

/// Counts of what the server announced, plus the saved files
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ListenSummary {
    pub activities: usize,
    pub files_created: usize,
    pub downloads: Vec<PathBuf>,
}

/// Listen until the server closes the connection
pub async fn listen(options: &ListenOptions) -> Result<ListenSummary, ClientError> {
    if !options.download_dir.is_dir() {
        return Err(ClientError::MissingDownloadDir(options.download_dir.clone()));
    }

    let (mut socket, _) =
        connect_async(options.uri.as_str())
            .await
            .map_err(|source| ClientError::Connect {
                uri: options.uri.clone(),
                source,
            })?;
    tracing::info!(uri = %options.uri, "Connected to capture server");

    if options.download {
        let request = ControlMessage::DownloadEnable { value: true }.to_json();
        socket.send(Message::text(request)).await?;
    }

    let mut summary = ListenSummary::default();
    let mut ack_pending = options.download;
    let mut last_created: Option<String> = None;
    let mut transfer: Option<String> = None;

    while let Some(frame) = socket.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Connection lost");
                break;
            }
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ControlMessage>(text.as_str()) {
                Ok(ControlMessage::DownloadEnable { value }) => {
                    if ack_pending && !value {
                        return Err(ClientError::DownloadRejected);
                    }
                    ack_pending = false;
                    tracing::info!(value, "Downloads acknowledged");
                }
                Ok(ControlMessage::SoundActivity {
                    activity_score,
                    activity_threshold,
                    buffer_id_start,
                    nr_runs,
                    ..
                }) => {
                    summary.activities += 1;
                    tracing::info!(
                        score = activity_score,
                        threshold = activity_threshold,
                        slot = buffer_id_start,
                        run = nr_runs,
                        "Sound activity"
                    );
                }
                Ok(ControlMessage::AudioFileCreated {
                    nr_runs,
                    audio_file,
                }) => {
                    summary.files_created += 1;
                    tracing::info!(file = %audio_file, run = nr_runs, "Audio file created");
                    last_created = Some(audio_file);
                }
                Ok(ControlMessage::AudioFileSent { audio_file }) => {
                    tracing::debug!(file = %audio_file, "Transfer announced");
                    transfer = Some(audio_file);
                }
                Err(e) => tracing::warn!(error = %e, "Unrecognized message"),
            },
            Message::Binary(bytes) => {
                let Some(sent) = transfer.take() else {
                    tracing::warn!(len = bytes.len(), "Binary frame without transfer header");
                    continue;
                };
                let path = download_path(
                    &options.download_dir,
                    last_created.as_deref().unwrap_or(&sent),
                );
                std::fs::write(&path, &bytes).map_err(|source| ClientError::Save {
                    path: path.clone(),
                    source,
                })?;
                tracing::info!(path = %path.display(), bytes = bytes.len(), "Audio file saved");
                summary.downloads.push(path);
            }
            Message::Close(frame) => {
                let reason = frame.as_ref().map(|f| f.reason.as_str()).unwrap_or("");
                tracing::info!(reason, "Server closed the connection");
            }
            _ => {}
        }
    }

    if ack_pending {
        tracing::warn!("Connection closed before downloads were acknowledged");
    }
    Ok(summary)
}

/// Server paths mean nothing here; only the file name is kept
fn download_path(dir: &Path, audio_file: &str) -> PathBuf {
    let name = Path::new(audio_file)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "download.wav".into());
    dir.join(name)
}
