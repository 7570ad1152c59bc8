use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, trace, warn};

use kindred_types::events::{ClientFrame, ServerFrame};
use kindred_types::models::{ConversationId, UserId};

use crate::hub::Hub;
use crate::{SessionId, encode_frame};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long the write pump gets to flush and close after the read side ends.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Decides whether a user may join (or send typing indicators to) a conversation.
pub trait JoinPolicy: Send + Sync + 'static {
    fn may_join(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, bool>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("binary frames are not accepted")]
    Binary,
}

/// Read-side state of one session.
pub(crate) struct SessionContext {
    session_id: SessionId,
    user_id: UserId,
    hub: Hub,
    policy: Arc<dyn JoinPolicy>,
}

impl SessionContext {
    pub(crate) fn new(
        session_id: SessionId,
        user_id: UserId,
        hub: Hub,
        policy: Arc<dyn JoinPolicy>,
    ) -> Self {
        Self {
            session_id,
            user_id,
            hub,
            policy,
        }
    }

    /// Handle one text frame. An error is a protocol violation and ends the session.
    pub(crate) async fn handle_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    "user {} sent a bad frame: {} -- raw: {}",
                    self.user_id,
                    e,
                    text.chars().take(200).collect::<String>()
                );
                return Err(e.into());
            }
        };

        match frame {
            ClientFrame::JoinConversation { conversation_id } => {
                if self.authorize(conversation_id).await {
                    self.hub.join_conversation(self.session_id, conversation_id);
                }
            }
            ClientFrame::Typing { conversation_id } => self.typing(conversation_id, true).await,
            ClientFrame::StopTyping { conversation_id } => {
                self.typing(conversation_id, false).await
            }
            ClientFrame::Unknown => {
                trace!("user {} sent an unknown frame type, ignoring", self.user_id);
            }
        }
        Ok(())
    }

    async fn typing(&self, conversation_id: ConversationId, is_typing: bool) {
        if !self.authorize(conversation_id).await {
            return;
        }
        match encode_frame(&ServerFrame::typing(conversation_id, self.user_id, is_typing)) {
            Ok(frame) => self.hub.broadcast_to_conversation(conversation_id, frame),
            Err(e) => warn!("Failed to encode typing frame: {}", e),
        }
    }

    /// Asked on every frame: a match can end while the session is open.
    async fn authorize(&self, conversation_id: ConversationId) -> bool {
        if self.policy.may_join(self.user_id, conversation_id).await {
            true
        } else {
            debug!(
                "user {} is not a participant of conversation {}, ignoring",
                self.user_id, conversation_id
            );
            false
        }
    }
}

/// Drive one authenticated WebSocket connection until it closes.
///
/// The session is registered with the hub, then a write pump drains its outbound queue
/// (with heartbeat) while the read pump handles control frames. When the read side ends
/// the session unregisters, which closes the queue and lets the write pump send Close.
pub async fn run_session(
    socket: WebSocket,
    hub: Hub,
    user_id: UserId,
    policy: Arc<dyn JoinPolicy>,
) {
    let (session_id, mut outbound) = match hub.register(user_id) {
        Ok(registered) => registered,
        Err(e) => {
            warn!("Could not register session for user {}: {}", user_id, e);
            return;
        }
    };
    info!("user {} connected (session {})", user_id, session_id);

    let (mut sender, mut receiver) = socket.split();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                next = outbound.recv() => {
                    let Some(frame) = next else {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    };
                    let Some(text) = frame_text(frame) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut ctx = SessionContext::new(session_id, user_id, hub.clone(), policy);
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let violation = match msg {
                Ok(Message::Text(text)) => ctx.handle_text(text.as_str()).await.err(),
                Ok(Message::Binary(_)) => Some(ProtocolError::Binary),
                Ok(Message::Pong(_)) => {
                    pong_flag_recv.store(true, Ordering::Release);
                    None
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => None,
                Err(e) => {
                    debug!("user {} read error: {}", user_id, e);
                    break;
                }
            };
            if let Some(e) = violation {
                warn!("user {} protocol violation: {}", user_id, e);
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            hub.unregister(session_id);
        }
        _ = &mut recv_task => {
            hub.unregister(session_id);
            if tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
    }

    info!("user {} disconnected (session {})", user_id, session_id);
}

fn frame_text(frame: Bytes) -> Option<String> {
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Dropping non-UTF-8 outbound frame: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;

    struct Participants(Vec<ConversationId>);

    impl JoinPolicy for Participants {
        fn may_join(
            &self,
            _user_id: UserId,
            conversation_id: ConversationId,
        ) -> BoxFuture<'static, bool> {
            let allowed = self.0.contains(&conversation_id);
            Box::pin(async move { allowed })
        }
    }

    fn context(
        hub: &Hub,
        user_id: UserId,
        allowed: Vec<ConversationId>,
    ) -> (SessionContext, tokio::sync::mpsc::Receiver<Bytes>) {
        let (session_id, rx) = hub.register(user_id).unwrap();
        let policy = Arc::new(Participants(allowed));
        let ctx = SessionContext::new(session_id, user_id, hub.clone(), policy);
        (ctx, rx)
    }

    #[tokio::test]
    async fn typing_is_echoed_to_the_joined_conversation() {
        let hub = Hub::spawn(HubConfig::default());
        let (mut ctx, mut rx) = context(&hub, 12, vec![7]);

        ctx.handle_text(r#"{"type":"join_conversation","conversation_id":7}"#).await.unwrap();
        ctx.handle_text(r#"{"type":"typing","conversation_id":7}"#).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(
            std::str::from_utf8(&frame).unwrap(),
            r#"{"type":"typing","conversation_id":7,"user_id":12,"is_typing":true}"#
        );

        ctx.handle_text(r#"{"type":"stop_typing","conversation_id":7}"#).await.unwrap();
        let frame = rx.recv().await.unwrap();
        assert!(std::str::from_utf8(&frame).unwrap().contains(r#""is_typing":false"#));
    }

    /// Lets anyone into conversation 7 until the match behind it ends.
    struct EndableMatch(Arc<AtomicBool>);

    impl JoinPolicy for EndableMatch {
        fn may_join(
            &self,
            _user_id: UserId,
            conversation_id: ConversationId,
        ) -> BoxFuture<'static, bool> {
            let allowed = conversation_id == 7 && self.0.load(Ordering::SeqCst);
            Box::pin(async move { allowed })
        }
    }

    #[tokio::test]
    async fn typing_stops_once_the_match_ends() {
        let hub = Hub::spawn(HubConfig::default());
        let active = Arc::new(AtomicBool::new(true));
        let policy: Arc<dyn JoinPolicy> = Arc::new(EndableMatch(active.clone()));
        let (alice_id, _alice_rx) = hub.register(1).unwrap();
        let (bob_id, mut bob_rx) = hub.register(2).unwrap();
        let mut alice = SessionContext::new(alice_id, 1, hub.clone(), policy.clone());
        let mut bob = SessionContext::new(bob_id, 2, hub.clone(), policy);

        let join = r#"{"type":"join_conversation","conversation_id":7}"#;
        alice.handle_text(join).await.unwrap();
        bob.handle_text(join).await.unwrap();
        alice.handle_text(r#"{"type":"typing","conversation_id":7}"#).await.unwrap();
        assert!(bob_rx.recv().await.is_some());

        active.store(false, Ordering::SeqCst);
        alice.handle_text(r#"{"type":"typing","conversation_id":7}"#).await.unwrap();

        hub.stats().await;
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_outside_participation_is_ignored() {
        let hub = Hub::spawn(HubConfig::default());
        let (mut ctx, mut rx) = context(&hub, 5, vec![]);

        ctx.handle_text(r#"{"type":"join_conversation","conversation_id":9}"#).await.unwrap();
        ctx.handle_text(r#"{"type":"typing","conversation_id":9}"#).await.unwrap();

        let stats = hub.stats().await;
        assert_eq!(stats.conversations, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_type_is_tolerated() {
        let hub = Hub::spawn(HubConfig::default());
        let (mut ctx, _rx) = context(&hub, 1, vec![]);
        assert!(ctx.handle_text(r#"{"type":"presence","online":true}"#).await.is_ok());
    }

    #[tokio::test]
    async fn malformed_frames_are_violations() {
        let hub = Hub::spawn(HubConfig::default());
        let (mut ctx, _rx) = context(&hub, 1, vec![7]);

        for bad in ["not json", "42", r#"{"type":"typing","conversation_id":"seven"}"#] {
            assert!(matches!(
                ctx.handle_text(bad).await,
                Err(ProtocolError::Malformed(_))
            ));
        }
    }
}
