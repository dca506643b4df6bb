//! Relay configuration

use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_SIGNALING_PORT: u16 = 8765;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(120);
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Per-connection timing
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// How often the server pings an idle client
    pub ping_interval: Duration,
    /// How long a ping may go unanswered
    pub pong_timeout: Duration,
    /// Longest gap between any two inbound frames, pongs included
    pub read_timeout: Duration,
    /// Upper bound on a single websocket write
    pub send_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            send_timeout: SEND_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub connection: ConnectionConfig,
    /// How long shutdown waits for open connections to finish closing
    pub shutdown_grace: Duration,
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_SIGNALING_PORT,
            connection: ConnectionConfig::default(),
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}
