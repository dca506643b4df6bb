//! Signaling relay letting two clients, addressed by user code, exchange
//! WebRTC offers, answers and ICE candidates over WebSocket.

pub mod config;
pub mod signaling;
