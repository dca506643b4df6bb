use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::messages::{ClientMessage, ServerMessage};
use super::registry::RegistryHandle;
use super::types::{ConnectionId, OutboundMessage, SignalingError, UserCode};

/// What happened to one inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forwarded to the target's connection
    Delivered { target: UserCode },
    /// Target not connected; the sender got an error envelope
    TargetNotFound { target: UserCode },
    /// Unusable envelope answered with an error envelope
    Rejected,
}

/// Dispatch state for one open client connection.
pub(crate) struct Session {
    code: UserCode,
    id: ConnectionId,
    tx: mpsc::UnboundedSender<OutboundMessage>,
    registry: RegistryHandle,
}

impl Session {
    pub(crate) fn new(
        code: UserCode,
        id: ConnectionId,
        tx: mpsc::UnboundedSender<OutboundMessage>,
        registry: RegistryHandle,
    ) -> Self {
        Self {
            code,
            id,
            tx,
            registry,
        }
    }

    pub(crate) fn code(&self) -> &UserCode {
        &self.code
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    /// Handle one inbound data frame. An `Err` means the connection must close.
    pub(crate) async fn handle_frame(&self, bytes: &[u8]) -> Result<RouteOutcome, SignalingError> {
        match ClientMessage::parse(bytes) {
            Ok(msg) => self.route(msg).await,
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!("Rejected envelope from {}: {}", self.code, e);
                self.reply(&ServerMessage::error(e.to_string()))?;
                Ok(RouteOutcome::Rejected)
            }
        }
    }

    async fn route(&self, msg: ClientMessage) -> Result<RouteOutcome, SignalingError> {
        let kind = msg.kind();
        let (target, relayed) = msg.into_relay(self.code.clone());

        if let Some(peer) = self.registry.lookup(&target).await? {
            if peer.send(relayed.encode()?) {
                debug!("Relayed {} from {} to {}", kind, self.code, target);
                return Ok(RouteOutcome::Delivered { target });
            }
            debug!("Connection for {} is closing, dropping {}", target, kind);
        }

        debug!("{} from {} to offline user {}", kind, self.code, target);
        self.reply(&ServerMessage::target_not_found(&target))?;
        Ok(RouteOutcome::TargetNotFound { target })
    }

    fn reply(&self, msg: &ServerMessage) -> Result<(), SignalingError> {
        self.tx
            .send(msg.encode()?)
            .map_err(|_| SignalingError::ChannelClosed(self.code.clone()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::signaling::types::PeerChannel;

    struct Client {
        session: Session,
        rx: mpsc::UnboundedReceiver<OutboundMessage>,
    }

    async fn connect(registry: &RegistryHandle, code: &str) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::generate();
        registry
            .register(UserCode::from(code), PeerChannel::new(id, tx.clone()))
            .await
            .unwrap();
        Client {
            session: Session::new(UserCode::from(code), id, tx, registry.clone()),
            rx,
        }
    }

    fn next_json(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Value {
        match rx.try_recv() {
            Ok(OutboundMessage::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("Expected text message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn offer_is_relayed_with_sender_code() {
        let registry = RegistryHandle::spawn();
        let alice = connect(&registry, "alice").await;
        let mut bob = connect(&registry, "bob").await;

        let outcome = alice
            .session
            .handle_frame(br#"{"type":"call-offer","target":"bob","offer":{"sdp":"v=0"}}"#)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                target: UserCode::from("bob")
            }
        );
        assert_eq!(
            next_json(&mut bob.rx),
            json!({"type": "call-offer", "from": "alice", "offer": {"sdp": "v=0"}})
        );
        assert!(bob.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_target_reports_error_to_sender_only() {
        let registry = RegistryHandle::spawn();
        let mut alice = connect(&registry, "alice").await;
        let mut bob = connect(&registry, "bob").await;

        let outcome = alice
            .session
            .handle_frame(br#"{"type":"call-offer","target":"carol","offer":{}}"#)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::TargetNotFound {
                target: UserCode::from("carol")
            }
        );

        let error = next_json(&mut alice.rx);
        assert_eq!(error["type"], "error");
        assert!(error["message"].as_str().unwrap().contains("carol"));
        assert!(alice.rx.try_recv().is_err());
        assert!(bob.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn every_kind_reaches_target() {
        let registry = RegistryHandle::spawn();
        let alice = connect(&registry, "alice").await;
        let mut bob = connect(&registry, "bob").await;

        let frames: [&[u8]; 5] = [
            br#"{"type":"call-offer","target":"bob","offer":{"sdp":"o"}}"#,
            br#"{"type":"call-candidate","target":"bob","candidate":{"candidate":"c"}}"#,
            br#"{"type":"call-answer","target":"bob","answer":{"sdp":"a"}}"#,
            br#"{"type":"call-reject","target":"bob"}"#,
            br#"{"type":"call-end","target":"bob"}"#,
        ];
        for frame in frames {
            alice.session.handle_frame(frame).await.unwrap();
        }

        let kinds: Vec<Value> = (0..5).map(|_| next_json(&mut bob.rx)["type"].clone()).collect();
        assert_eq!(
            kinds,
            vec![
                json!("call-offer"),
                json!("call-candidate"),
                json!("call-answer"),
                json!("call-reject"),
                json!("call-end"),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_type_is_answered_and_not_fatal() {
        let registry = RegistryHandle::spawn();
        let mut alice = connect(&registry, "alice").await;

        let outcome = alice
            .session
            .handle_frame(br#"{"type":"call-hold","target":"bob"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Rejected);

        let error = next_json(&mut alice.rx);
        assert_eq!(error["type"], "error");
        assert_eq!(error["message"], "unsupported message type: call-hold");
    }

    #[tokio::test]
    async fn malformed_frame_is_fatal_without_reply() {
        let registry = RegistryHandle::spawn();
        let mut alice = connect(&registry, "alice").await;

        let result = alice.session.handle_frame(b"{not json").await;
        assert!(matches!(result, Err(SignalingError::Envelope(_))));
        assert!(alice.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_target_counts_as_not_found() {
        let registry = RegistryHandle::spawn();
        let mut alice = connect(&registry, "alice").await;
        let bob = connect(&registry, "bob").await;
        drop(bob.rx);

        let outcome = alice
            .session
            .handle_frame(br#"{"type":"call-end","target":"bob"}"#)
            .await
            .unwrap();
        assert!(matches!(outcome, RouteOutcome::TargetNotFound { .. }));
        assert_eq!(next_json(&mut alice.rx)["type"], "error");
    }
}
