//! WebSocket client for the message change stream.
//!
//! The store pushes JSON frames, each carrying one batch of change records
//! already ordered by the server. Heartbeat frames keep the connection
//! alive. Reconnection is left to the caller: when the socket closes or
//! errors, the stream yields one `Err` and ends.

use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::{ChangeBatch, ChangeRecord, ChangeStream, StoreError};

/// No frame (heartbeats included) for this long means the connection is dead.
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// WebSocket change stream client.
pub struct StreamClient {
    /// Full listen URL, including the query string.
    url: String,
    /// Optional bearer token.
    token: Option<String>,
}

impl StreamClient {
    /// Create a client for a listen URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    /// Send a bearer token in the upgrade request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Connect and spawn the reader task.
    ///
    /// Returns once the WebSocket handshake has completed.
    pub async fn connect(self) -> Result<ChangeStream, StoreError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| StoreError::WebSocket(format!("invalid stream URL: {}", e)))?;

        if let Some(token) = &self.token {
            let value = format!("Bearer {}", token)
                .parse()
                .map_err(|_| StoreError::WebSocket("invalid token header".to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        info!(url = %self.url, "connecting to change stream");

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| StoreError::WebSocket(format!("connection failed: {}", e)))?;

        info!("change stream connected");

        let (_, read) = ws_stream.split();
        let (tx, stream) = ChangeStream::channel();
        let task = tokio::spawn(async move {
            if let Err(e) = read_frames(read, &tx).await {
                warn!(error = %e, "change stream lost");
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(stream.with_task(task))
    }
}

/// Forward frames until the socket ends or the receiver is dropped.
///
/// Returns `Ok` only when the receiving side went away.
async fn read_frames<S>(
    mut read: S,
    tx: &mpsc::Sender<Result<ChangeBatch, StoreError>>,
) -> Result<(), StoreError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = match tokio::time::timeout(READ_TIMEOUT, read.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => return Err(StoreError::WebSocket(format!("read error: {}", e))),
            Ok(None) => return Err(StoreError::WebSocket("stream ended".to_string())),
            Err(_) => {
                return Err(StoreError::WebSocket(format!(
                    "read timeout after {}s",
                    READ_TIMEOUT.as_secs()
                )));
            }
        };

        match message {
            Message::Text(text) => {
                if let Some(batch) = parse_frame(&text)? {
                    trace!(changes = batch.len(), "received change batch");
                    if tx.send(Ok(batch)).await.is_err() {
                        debug!("change stream receiver dropped");
                        return Ok(());
                    }
                }
            }
            Message::Ping(_) => {
                // tungstenite auto-responds to pings
                trace!("received ping");
            }
            Message::Close(_) => {
                info!("change stream closed by server");
                return Err(StoreError::WebSocket("connection closed".to_string()));
            }
            _ => {}
        }
    }
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for frames that carry no changes.
pub fn parse_frame(text: &str) -> Result<Option<ChangeBatch>, StoreError> {
    let frame: StreamFrame = serde_json::from_str(text)?;

    match frame {
        StreamFrame::Changes { changes } => Ok(Some(changes)),
        StreamFrame::Heartbeat => {
            trace!("heartbeat");
            Ok(None)
        }
        StreamFrame::Error { message } => Err(StoreError::WebSocket(format!(
            "server error: {}",
            message
        ))),
    }
}

// =============================================================================
// Stream JSON types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamFrame {
    /// A batch of change records.
    Changes { changes: Vec<ChangeRecord> },
    /// Keep-alive.
    Heartbeat,
    /// The server is about to drop the subscription.
    Error { message: String },
}
