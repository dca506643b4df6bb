use std::fmt;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Signaling server errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("no signaling endpoint at {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("outbound channel closed for {0}")]
    ChannelClosed(UserCode),

    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Reasons an inbound envelope could not be turned into a [`ClientMessage`].
///
/// [`ClientMessage`]: super::ClientMessage
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("missing message type")]
    MissingType,

    #[error("unsupported message type: {0}")]
    UnknownType(String),

    #[error("invalid {kind} message: {source}")]
    Invalid {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl EnvelopeError {
    /// Only unparsable payloads end the connection; everything else is
    /// answered with an error envelope.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EnvelopeError::Malformed(_))
    }
}

const CONNECTION_ID_LEN: usize = 13;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Opaque client-chosen code addressing one connected client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserCode(Arc<str>);

impl UserCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for UserCode {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for UserCode {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl Serialize for UserCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UserCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(UserCode::from(s))
    }
}

/// Connection ID: 13-byte fixed array ("conn_" + 8 hex)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    bytes: [u8; CONNECTION_ID_LEN],
}

impl ConnectionId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; CONNECTION_ID_LEN];
        bytes[..5].copy_from_slice(b"conn_");

        let value: u32 = rand::rng().random();
        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            bytes[5 + i] = HEX_CHARS[nibble];
        }
        Self { bytes }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the relay is closing a client connection on its own initiative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection registered the same user code
    Replaced,
    /// The server is shutting down
    Shutdown,
}

impl CloseReason {
    pub fn close_frame(self) -> CloseFrame {
        match self {
            CloseReason::Replaced => CloseFrame {
                code: CloseCode::Policy,
                reason: Utf8Bytes::from_static("replaced by a newer connection"),
            },
            CloseReason::Shutdown => CloseFrame {
                code: CloseCode::Away,
                reason: Utf8Bytes::from_static("server shutting down"),
            },
        }
    }
}

/// Item queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Encoded envelope, sent as a text frame
    Text(Utf8Bytes),
    /// Send a close frame and stop writing
    Close(CloseReason),
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self::Text(Utf8Bytes::from(s))
    }
}

/// Registry entry: the writable side of one live connection.
#[derive(Debug, Clone)]
pub struct PeerChannel {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl PeerChannel {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message for this connection's writer. Returns `false` once the
    /// writer is gone.
    pub fn send(&self, msg: OutboundMessage) -> bool {
        self.tx.send(msg).is_ok()
    }

    pub fn close(&self, reason: CloseReason) -> bool {
        self.send(OutboundMessage::Close(reason))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
