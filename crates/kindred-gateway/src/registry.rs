use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;

use kindred_types::models::{ConversationId, UserId};

use crate::SessionId;

/// The hub's record of one live session.
#[derive(Debug)]
pub struct SessionEntry {
    pub user_id: UserId,
    /// Unset until the client sends `join_conversation`.
    pub conversation: Option<ConversationId>,
    /// Sending half of the session's bounded outbound queue. Dropping it closes the
    /// queue, which stops the write pump.
    pub tx: mpsc::Sender<Bytes>,
}

/// Live sessions by id. Owned by the hub task; never shared.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<SessionId, SessionEntry>,
}

impl ConnectionRegistry {
    pub fn insert(&mut self, id: SessionId, entry: SessionEntry) {
        self.sessions.insert(id, entry);
    }

    /// Idempotent; returns the entry if it was present.
    pub fn remove(&mut self, id: &SessionId) -> Option<SessionEntry> {
        self.sessions.remove(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionEntry> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut SessionEntry> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn remove_is_idempotent() {
        let mut registry = ConnectionRegistry::default();
        let (tx, _rx) = mpsc::channel(1);
        let id = Uuid::new_v4();
        registry.insert(
            id,
            SessionEntry {
                user_id: 1,
                conversation: None,
                tx,
            },
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }
}
