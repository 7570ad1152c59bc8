//! The connection hub: one tokio task owns the registry and router, and every
//! register / unregister / join / broadcast arrives as a command on its channel.
//! Handlers and session pumps only ever hold a cheap [`Hub`] handle.

use anyhow::{Result, anyhow};
use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindred_types::models::{ConversationId, UserId};

use crate::SessionId;
use crate::registry::{ConnectionRegistry, SessionEntry};
use crate::router::ConversationRouter;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound frames buffered per session before it is evicted as a slow consumer.
    pub send_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub sessions: usize,
    pub users: usize,
    pub conversations: usize,
}

#[derive(Debug)]
pub(crate) enum Command {
    Register {
        session_id: SessionId,
        user_id: UserId,
        tx: mpsc::Sender<Bytes>,
    },
    Unregister {
        session_id: SessionId,
    },
    Join {
        session_id: SessionId,
        conversation_id: ConversationId,
    },
    CloseConversation {
        conversation_id: ConversationId,
    },
    BroadcastAll {
        frame: Bytes,
    },
    BroadcastToConversation {
        conversation_id: ConversationId,
        frame: Bytes,
    },
    BroadcastToUser {
        user_id: UserId,
        frame: Bytes,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Handle to the hub task. Cloning is cheap; the task stops once every handle is gone.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<Command>,
    config: HubConfig,
}

impl Hub {
    pub fn spawn(config: HubConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        info!(
            "Hub started (send queue capacity {})",
            config.send_queue_capacity
        );
        Self { tx, config }
    }

    /// Admit a new session for `user_id`. Returns its id and the receiving half of its
    /// outbound queue.
    pub fn register(&self, user_id: UserId) -> Result<(SessionId, mpsc::Receiver<Bytes>)> {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.config.send_queue_capacity.max(1));
        self.send(Command::Register {
            session_id,
            user_id,
            tx,
        })?;
        Ok((session_id, rx))
    }

    pub fn unregister(&self, session_id: SessionId) {
        let _ = self.send(Command::Unregister { session_id });
    }

    pub fn join_conversation(&self, session_id: SessionId, conversation_id: ConversationId) {
        let _ = self.send(Command::Join {
            session_id,
            conversation_id,
        });
    }

    /// Detach every session from `conversation_id`, e.g. once the match behind it ends.
    pub fn close_conversation(&self, conversation_id: ConversationId) {
        let _ = self.send(Command::CloseConversation { conversation_id });
    }

    pub fn broadcast_all(&self, frame: Bytes) {
        let _ = self.send(Command::BroadcastAll { frame });
    }

    pub fn broadcast_to_conversation(&self, conversation_id: ConversationId, frame: Bytes) {
        let _ = self.send(Command::BroadcastToConversation {
            conversation_id,
            frame,
        });
    }

    pub fn broadcast_to_user(&self, user_id: UserId, frame: Bytes) {
        let _ = self.send(Command::BroadcastToUser { user_id, frame });
    }

    /// Current counts. Commands are handled in order, so this also waits for every
    /// command sent before it to take effect.
    pub async fn stats(&self) -> HubStats {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Stats { reply }).is_err() {
            return HubStats::default();
        }
        rx.await.unwrap_or_default()
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| {
            debug!("Hub task is gone, dropping command");
            anyhow!("hub is not running")
        })
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut state = HubState::default();
    while let Some(cmd) = rx.recv().await {
        state.apply(cmd);
    }
    debug!("Hub task exiting");
}

/// Everything the hub task owns. Kept synchronous so it can be driven directly in tests.
#[derive(Debug, Default)]
pub(crate) struct HubState {
    registry: ConnectionRegistry,
    router: ConversationRouter,
}

impl HubState {
    pub(crate) fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Register {
                session_id,
                user_id,
                tx,
            } => {
                self.registry.insert(
                    session_id,
                    SessionEntry {
                        user_id,
                        conversation: None,
                        tx,
                    },
                );
                self.router.add_session(session_id, user_id);
                debug!("Session {} registered for user {}", session_id, user_id);
            }

            Command::Unregister { session_id } => {
                if self.remove(&session_id) {
                    debug!("Session {} unregistered", session_id);
                }
            }

            Command::Join {
                session_id,
                conversation_id,
            } => {
                // The session may already have been evicted
                let Some(entry) = self.registry.get_mut(&session_id) else {
                    return;
                };
                let previous = entry.conversation.replace(conversation_id);
                self.router.join(session_id, previous, conversation_id);
                debug!(
                    "Session {} joined conversation {}",
                    session_id, conversation_id
                );
            }

            Command::CloseConversation { conversation_id } => {
                let sessions = self.router.close_conversation(conversation_id);
                for id in &sessions {
                    if let Some(entry) = self.registry.get_mut(id) {
                        entry.conversation = None;
                    }
                }
                if !sessions.is_empty() {
                    debug!(
                        "Conversation {} closed, detached {} sessions",
                        conversation_id,
                        sessions.len()
                    );
                }
            }

            Command::BroadcastAll { frame } => {
                let targets = self.registry.ids();
                self.deliver(targets, &frame);
            }

            Command::BroadcastToConversation {
                conversation_id,
                frame,
            } => {
                let targets = self.router.conversation_sessions(conversation_id);
                self.deliver(targets, &frame);
            }

            Command::BroadcastToUser { user_id, frame } => {
                let targets = self.router.user_sessions(user_id);
                self.deliver(targets, &frame);
            }

            Command::Stats { reply } => {
                let _ = reply.send(HubStats {
                    sessions: self.registry.len(),
                    users: self.router.user_count(),
                    conversations: self.router.conversation_count(),
                });
            }
        }
    }

    /// Non-blocking delivery. A session whose queue is full or closed is evicted.
    fn deliver(&mut self, targets: Vec<SessionId>, frame: &Bytes) {
        let mut evicted = Vec::new();
        for id in targets {
            let Some(entry) = self.registry.get(&id) else {
                continue;
            };
            match entry.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Session {} (user {}) is not keeping up, evicting",
                        id, entry.user_id
                    );
                    evicted.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Session {} queue already closed, removing", id);
                    evicted.push(id);
                }
            }
        }
        for id in evicted {
            self.remove(&id);
        }
    }

    /// Drop a session from the registry and every router index. Dropping its entry
    /// drops the sender, which closes the outbound queue.
    fn remove(&mut self, id: &SessionId) -> bool {
        match self.registry.remove(id) {
            Some(entry) => {
                self.router
                    .remove_session(*id, entry.user_id, entry.conversation);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn is_known(&self, id: &SessionId) -> bool {
        self.registry.contains(id) || self.router.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_types::events::ServerFrame;

    fn register(
        state: &mut HubState,
        user_id: UserId,
        capacity: usize,
    ) -> (SessionId, mpsc::Receiver<Bytes>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity);
        state.apply(Command::Register {
            session_id,
            user_id,
            tx,
        });
        (session_id, rx)
    }

    fn join(state: &mut HubState, session_id: SessionId, conversation_id: ConversationId) {
        state.apply(Command::Join {
            session_id,
            conversation_id,
        });
    }

    fn frame(text: &'static str) -> Bytes {
        Bytes::from_static(text.as_bytes())
    }

    #[test]
    fn full_queue_evicts_from_registry_and_router() {
        let mut state = HubState::default();
        let (slow, _slow_rx) = register(&mut state, 1, 1);
        let (fast, mut fast_rx) = register(&mut state, 2, 8);
        join(&mut state, slow, 42);
        join(&mut state, fast, 42);

        state.apply(Command::BroadcastToConversation {
            conversation_id: 42,
            frame: frame("one"),
        });
        state.apply(Command::BroadcastToConversation {
            conversation_id: 42,
            frame: frame("two"),
        });

        assert!(!state.is_known(&slow));
        assert!(state.is_known(&fast));

        // A later broadcast skips the evicted session without failing
        state.apply(Command::BroadcastToConversation {
            conversation_id: 42,
            frame: frame("three"),
        });
        assert_eq!(fast_rx.try_recv().unwrap(), frame("one"));
        assert_eq!(fast_rx.try_recv().unwrap(), frame("two"));
        assert_eq!(fast_rx.try_recv().unwrap(), frame("three"));
    }

    #[test]
    fn eviction_closes_the_outbound_queue() {
        let mut state = HubState::default();
        let (slow, mut slow_rx) = register(&mut state, 1, 1);
        state.apply(Command::BroadcastToUser {
            user_id: 1,
            frame: frame("a"),
        });
        state.apply(Command::BroadcastToUser {
            user_id: 1,
            frame: frame("b"),
        });
        assert!(!state.is_known(&slow));

        assert_eq!(slow_rx.try_recv().unwrap(), frame("a"));
        assert!(matches!(
            slow_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn closed_queue_is_removed_on_next_delivery() {
        let mut state = HubState::default();
        let (gone, rx) = register(&mut state, 1, 4);
        drop(rx);
        state.apply(Command::BroadcastAll { frame: frame("x") });
        assert!(!state.is_known(&gone));
    }

    #[test]
    fn unregister_is_idempotent_and_join_after_eviction_is_ignored() {
        let mut state = HubState::default();
        let (s, _rx) = register(&mut state, 1, 4);
        state.apply(Command::Unregister { session_id: s });
        state.apply(Command::Unregister { session_id: s });
        join(&mut state, s, 42);
        assert!(!state.is_known(&s));
    }

    #[test]
    fn closed_conversation_no_longer_receives_frames() {
        let mut state = HubState::default();
        let (a, mut rx_a) = register(&mut state, 1, 4);
        let (b, mut rx_b) = register(&mut state, 2, 4);
        join(&mut state, a, 42);
        join(&mut state, b, 42);

        state.apply(Command::CloseConversation { conversation_id: 42 });
        state.apply(Command::BroadcastToConversation {
            conversation_id: 42,
            frame: frame("late"),
        });
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        // Sessions stay connected and can still be reached per user
        assert!(state.is_known(&a));
        assert!(state.registry.get(&a).unwrap().conversation.is_none());
        state.apply(Command::BroadcastToUser {
            user_id: 2,
            frame: frame("direct"),
        });
        assert_eq!(rx_b.try_recv().unwrap(), frame("direct"));

        state.apply(Command::Unregister { session_id: a });
        assert!(!state.is_known(&a));
    }

    #[tokio::test]
    async fn conversation_fan_out_is_ordered_and_scoped() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, mut rx_a) = hub.register(1).unwrap();
        let (b, mut rx_b) = hub.register(2).unwrap();
        let (c, mut rx_c) = hub.register(3).unwrap();
        hub.join_conversation(a, 42);
        hub.join_conversation(b, 42);
        hub.join_conversation(c, 43);

        let frames: Vec<Bytes> = (1..=3)
            .map(|i| {
                crate::encode_frame(&ServerFrame::Message {
                    conversation_id: 42,
                    sender_id: 1,
                    content: format!("message {}", i),
                    message_type: Default::default(),
                    timestamp: "2025-01-01T00:00:00Z".into(),
                })
                .unwrap()
            })
            .collect();
        for f in &frames {
            hub.broadcast_to_conversation(42, f.clone());
        }

        for f in &frames {
            assert_eq!(rx_a.recv().await.as_ref(), Some(f));
            assert_eq!(rx_b.recv().await.as_ref(), Some(f));
        }

        // Stats is processed after the broadcasts, so nothing more can arrive for 43
        let stats = hub.stats().await;
        assert_eq!(stats.sessions, 3);
        assert_eq!(stats.conversations, 2);
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn user_broadcast_reaches_every_session_of_that_user() {
        let hub = Hub::spawn(HubConfig::default());
        let (_, mut first) = hub.register(7).unwrap();
        let (_, mut second) = hub.register(7).unwrap();
        let (_, mut other) = hub.register(8).unwrap();

        hub.broadcast_to_user(7, frame("hello"));
        assert_eq!(first.recv().await.unwrap(), frame("hello"));
        assert_eq!(second.recv().await.unwrap(), frame("hello"));

        assert_eq!(hub.stats().await.users, 2);
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_closes_queue() {
        let hub = Hub::spawn(HubConfig::default());
        let (id, mut rx) = hub.register(1).unwrap();
        hub.unregister(id);
        assert!(rx.recv().await.is_none());
        assert_eq!(hub.stats().await, HubStats::default());
    }
}
