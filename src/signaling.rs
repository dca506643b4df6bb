//! WebSocket signaling relay for WebRTC call setup

mod messages;
mod registry;
mod server;
mod session;
mod types;

pub use messages::{ClientMessage, ServerMessage};
pub use registry::RegistryHandle;
pub use server::SignalingServer;
pub use session::RouteOutcome;
pub use types::{
    CloseReason, ConnectionId, EnvelopeError, OutboundMessage, PeerChannel, SignalingError,
    UserCode,
};
