use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use percent_encoding::percent_decode_str;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN,
};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::registry::RegistryHandle;
use super::session::Session;
use super::types::{
    CloseReason, ConnectionId, OutboundMessage, PeerChannel, SignalingError, UserCode,
};
use crate::config::{ConnectionConfig, RelayConfig};

const PATH_PREFIX: &str = "/ws/";
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// Out of file descriptors (per process / system wide).
const EMFILE: i32 = 24;
const ENFILE: i32 = 23;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub struct SignalingServer {
    listener: TcpListener,
    registry: RegistryHandle,
    config: RelayConfig,
}

impl SignalingServer {
    /// Bind the listener and start the registry actor.
    pub async fn bind(config: RelayConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        info!("Signaling server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry: RegistryHandle::spawn(),
            config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> RegistryHandle {
        self.registry.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves, then close every open
    /// connection and wait up to the configured grace period for them.
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            if let Some(backoff) = accept_backoff(&e) {
                                tokio::time::sleep(backoff).await;
                            }
                            continue;
                        }
                    };
                    let registry = self.registry.clone();
                    let config = self.config.connection;

                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, registry, config).await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        match self.registry.close_all(CloseReason::Shutdown).await {
            Ok(count) => info!("Shutting down, closing {} connections", count),
            Err(e) => warn!("Could not close connections: {}", e),
        }

        let drained = timeout(self.config.shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("{} connections still open after grace period", connections.len());
        }

        info!("Signaling server stopped");
        Ok(())
    }
}

/// Accept errors never stop the server. Running out of descriptors is
/// retried after a pause so the loop does not spin.
fn accept_backoff(e: &std::io::Error) -> Option<Duration> {
    match e.raw_os_error() {
        Some(EMFILE | ENFILE) => Some(ACCEPT_BACKOFF),
        _ => None,
    }
}

/// Extract the percent-decoded user code from a `/ws/{user_code}` request
/// path.
pub(crate) fn user_code_from_path(path: &str) -> Option<UserCode> {
    let raw = path.strip_prefix(PATH_PREFIX)?;
    if raw.is_empty() || raw.contains('/') {
        return None;
    }
    let code = percent_decode_str(raw).decode_utf8().ok()?;
    Some(UserCode::from(code.as_ref()))
}

/// Echo the caller's origin back so browsers on any origin may connect,
/// credentials included. Any method and header is allowed as well.
fn allow_any_origin(request: &Request, mut response: Response) -> Response {
    let origin = request
        .headers()
        .get(ORIGIN)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    response
}

fn not_found(path: &str) -> ErrorResponse {
    let body = SignalingError::InvalidPath(path.to_string()).to_string();
    let mut response = ErrorResponse::new(Some(body));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: RegistryHandle,
    config: ConnectionConfig,
) -> Result<(), SignalingError> {
    let mut requested: Option<UserCode> = None;
    let callback = |request: &Request, response: Response| {
        match user_code_from_path(request.uri().path()) {
            Some(code) => {
                requested = Some(code);
                Ok(allow_any_origin(request, response))
            }
            None => Err(not_found(request.uri().path())),
        }
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let code = requested.ok_or_else(|| SignalingError::InvalidPath(String::new()))?;

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let id = ConnectionId::generate();
    registry
        .register(code.clone(), PeerChannel::new(id, tx.clone()))
        .await?;
    info!("WebSocket connection from {} as {} ({})", addr, code, id);

    let session = Session::new(code, id, tx, registry.clone());
    let mut send_task = tokio::spawn(write_loop(ws_tx, rx, ctrl_rx, config.send_timeout));

    let mut ping_interval = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    let mut pong_deadline: Option<Instant> = None;
    let idle = tokio::time::sleep(config.read_timeout);
    tokio::pin!(idle);

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if pong_deadline.is_some() {
                    continue;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                pong_deadline = Some(Instant::now() + config.pong_timeout);
                debug!("Ping sent to {}", session.code());
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", session.code());
                break;
            }

            _ = &mut idle => {
                warn!("No traffic from {} for {:?}, disconnecting", session.code(), config.read_timeout);
                break;
            }

            _ = &mut send_task => {
                debug!("Writer for {} finished", session.code());
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", session.code(), e);
                        break;
                    }
                    None => break,
                };
                idle.as_mut().reset(Instant::now() + config.read_timeout);

                let frame = match msg {
                    Message::Text(text) => session.handle_frame(text.as_bytes()).await,
                    Message::Binary(data) => session.handle_frame(&data).await,
                    Message::Pong(_) => {
                        pong_deadline = None;
                        debug!("Pong received from {}", session.code());
                        continue;
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", session.code());
                        break;
                    }
                    _ => continue,
                };

                if let Err(e) = frame {
                    warn!("Dropping {}: {}", session.code(), e);
                    break;
                }
            }
        }
    }

    if let Err(e) = registry.release(session.code(), session.id()).await {
        warn!("Failed to release {}: {}", session.code(), e);
    }

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", session.code(), addr);

    Ok(())
}

/// Drain the connection's queues into the socket. Stops after a close
/// command, a failed write, or a write that exceeds `send_timeout`.
async fn write_loop(
    mut ws_tx: WsSink,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    mut ctrl_rx: mpsc::UnboundedReceiver<Message>,
    send_timeout: Duration,
) {
    loop {
        let (frame, last) = tokio::select! {
            Some(msg) = rx.recv() => match msg {
                OutboundMessage::Text(text) => (Message::Text(text), false),
                OutboundMessage::Close(reason) => (Message::Close(Some(reason.close_frame())), true),
            },
            Some(ctrl_msg) = ctrl_rx.recv() => (ctrl_msg, false),
            else => break,
        };

        match timeout(send_timeout, ws_tx.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write failed: {}", e);
                break;
            }
            Err(_) => {
                warn!("Write timed out after {:?}", send_timeout);
                break;
            }
        }

        if last {
            break;
        }
    }
}
