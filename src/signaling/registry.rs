use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::types::{CloseReason, ConnectionId, PeerChannel, SignalingError, UserCode};

const REGISTRY_QUEUE_DEPTH: usize = 1024;

/// Commands sent to the registry actor
pub(crate) enum RegistryCommand {
    Register {
        code: UserCode,
        channel: PeerChannel,
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    Lookup {
        code: UserCode,
        reply: oneshot::Sender<Option<PeerChannel>>,
    },
    Unregister {
        code: UserCode,
        reply: oneshot::Sender<bool>,
    },
    Release {
        code: UserCode,
        id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    Size {
        reply: oneshot::Sender<usize>,
    },
    CloseAll {
        reason: CloseReason,
        reply: oneshot::Sender<usize>,
    },
}

/// Owns the code → connection map. Commands are applied one at a time, so
/// two connections racing on the same code are serialized here.
pub(crate) async fn registry_actor(mut rx: mpsc::Receiver<RegistryCommand>) {
    let mut peers: HashMap<UserCode, PeerChannel> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RegistryCommand::Register {
                code,
                channel,
                reply,
            } => {
                let id = channel.id();
                let replaced = peers.insert(code.clone(), channel).map(|previous| {
                    previous.close(CloseReason::Replaced);
                    info!(
                        "User {} reconnected as {}, evicting {}",
                        code,
                        id,
                        previous.id()
                    );
                    previous.id()
                });

                info!("User {} connected. Total users: {}", code, peers.len());
                let _ = reply.send(replaced);
            }

            RegistryCommand::Lookup { code, reply } => {
                let peer = peers.get(&code).filter(|peer| !peer.is_closed()).cloned();
                let _ = reply.send(peer);
            }

            RegistryCommand::Unregister { code, reply } => {
                let removed = peers.remove(&code).is_some();
                if removed {
                    info!("User {} disconnected. Total users: {}", code, peers.len());
                }
                let _ = reply.send(removed);
            }

            RegistryCommand::Release { code, id, reply } => {
                let owned = peers.get(&code).is_some_and(|peer| peer.id() == id);
                if owned {
                    peers.remove(&code);
                    info!("User {} disconnected. Total users: {}", code, peers.len());
                } else {
                    debug!("Connection {} no longer owns {}", id, code);
                }
                let _ = reply.send(owned);
            }

            RegistryCommand::Size { reply } => {
                let _ = reply.send(peers.len());
            }

            RegistryCommand::CloseAll { reason, reply } => {
                let count = peers.len();
                for (_, peer) in peers.drain() {
                    peer.close(reason);
                }
                info!("Closed {} connections ({:?})", count, reason);
                let _ = reply.send(count);
            }
        }
    }

    debug!("Registry actor stopped");
}

/// Handle to communicate with the registry actor
#[derive(Clone)]
pub struct RegistryHandle {
    pub(crate) tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Start a registry actor on the current runtime. It stops once every
    /// handle is dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<RegistryCommand>(REGISTRY_QUEUE_DEPTH);
        tokio::spawn(registry_actor(rx));
        Self { tx }
    }

    /// Store `channel` under `code`, replacing and closing any previous
    /// connection. Returns the id of the replaced connection.
    pub async fn register(
        &self,
        code: UserCode,
        channel: PeerChannel,
    ) -> Result<Option<ConnectionId>, SignalingError> {
        self.request(|reply| RegistryCommand::Register {
            code,
            channel,
            reply,
        })
        .await
    }

    /// Current channel for `code`, if it is connected and its writer is
    /// still running
    pub async fn lookup(&self, code: &UserCode) -> Result<Option<PeerChannel>, SignalingError> {
        let code = code.clone();
        self.request(|reply| RegistryCommand::Lookup { code, reply })
            .await
    }

    /// Remove `code` whatever connection holds it. Removing an absent code is
    /// a no-op and returns `false`.
    pub async fn unregister(&self, code: &UserCode) -> Result<bool, SignalingError> {
        let code = code.clone();
        self.request(|reply| RegistryCommand::Unregister { code, reply })
            .await
    }

    /// Remove `code` only while it still belongs to connection `id`.
    pub async fn release(&self, code: &UserCode, id: ConnectionId) -> Result<bool, SignalingError> {
        let code = code.clone();
        self.request(|reply| RegistryCommand::Release { code, id, reply })
            .await
    }

    pub async fn size(&self) -> Result<usize, SignalingError> {
        self.request(|reply| RegistryCommand::Size { reply }).await
    }

    /// Ask every registered connection to close and empty the registry.
    pub async fn close_all(&self, reason: CloseReason) -> Result<usize, SignalingError> {
        self.request(|reply| RegistryCommand::CloseAll { reason, reply })
            .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| SignalingError::Internal("registry channel closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("registry channel closed".to_string()))
    }
}
