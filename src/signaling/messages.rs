use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{EnvelopeError, OutboundMessage, UserCode};

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Propose a call to `target`
    CallOffer { target: UserCode, offer: Value },

    /// Accept a previously received offer
    CallAnswer { target: UserCode, answer: Value },

    /// Relay one ICE candidate
    CallCandidate { target: UserCode, candidate: Value },

    /// Decline an offer
    CallReject { target: UserCode },

    /// Terminate an active or pending call
    CallEnd { target: UserCode },
}

impl ClientMessage {
    /// Wire names of every inbound message kind.
    pub const KINDS: [&'static str; 5] = [
        "call-offer",
        "call-answer",
        "call-candidate",
        "call-reject",
        "call-end",
    ];

    /// Parse one inbound frame.
    ///
    /// Anything that is not a JSON object is [`EnvelopeError::Malformed`].
    /// A missing or unrecognised `type` and missing fields for a known type
    /// are reported separately so the caller can answer instead of hanging up.
    pub fn parse(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(EnvelopeError::Malformed("expected a JSON object".to_string()));
        };

        let kind = match fields.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => return Err(EnvelopeError::UnknownType(other.to_string())),
            None => return Err(EnvelopeError::MissingType),
        };
        if !Self::KINDS.contains(&kind.as_str()) {
            return Err(EnvelopeError::UnknownType(kind));
        }

        serde_json::from_value(Value::Object(fields))
            .map_err(|source| EnvelopeError::Invalid { kind, source })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CallOffer { .. } => "call-offer",
            ClientMessage::CallAnswer { .. } => "call-answer",
            ClientMessage::CallCandidate { .. } => "call-candidate",
            ClientMessage::CallReject { .. } => "call-reject",
            ClientMessage::CallEnd { .. } => "call-end",
        }
    }

    /// Split into the destination code and the envelope the destination
    /// receives, stamped with the sender's code.
    pub fn into_relay(self, from: UserCode) -> (UserCode, ServerMessage) {
        match self {
            ClientMessage::CallOffer { target, offer } => {
                (target, ServerMessage::CallOffer { from, offer })
            }
            ClientMessage::CallAnswer { target, answer } => {
                (target, ServerMessage::CallAnswer { from, answer })
            }
            ClientMessage::CallCandidate { target, candidate } => {
                (target, ServerMessage::CallCandidate { from, candidate })
            }
            ClientMessage::CallReject { target } => (target, ServerMessage::CallReject { from }),
            ClientMessage::CallEnd { target } => (target, ServerMessage::CallEnd { from }),
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    CallOffer { from: UserCode, offer: Value },

    CallAnswer { from: UserCode, answer: Value },

    CallCandidate { from: UserCode, candidate: Value },

    CallReject { from: UserCode },

    CallEnd { from: UserCode },

    /// Error response, only ever sent back to the originating client
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn target_not_found(target: &UserCode) -> Self {
        Self::error(format!("User {} not found", target))
    }

    pub fn encode(&self) -> Result<OutboundMessage, serde_json::Error> {
        Ok(OutboundMessage::from(serde_json::to_string(self)?))
    }
}
