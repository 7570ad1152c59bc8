use std::collections::{HashMap, HashSet};

use kindred_types::models::{ConversationId, UserId};

use crate::SessionId;

/// Reverse indexes from conversations and users to live sessions. Every session in here
/// is also in the registry; the hub keeps the two in step.
#[derive(Debug, Default)]
pub struct ConversationRouter {
    by_conversation: HashMap<ConversationId, HashSet<SessionId>>,
    by_user: HashMap<UserId, HashSet<SessionId>>,
}

impl ConversationRouter {
    pub fn add_session(&mut self, session: SessionId, user_id: UserId) {
        self.by_user.entry(user_id).or_default().insert(session);
    }

    /// Move `session` from its previous conversation (if any) to `to`.
    pub fn join(&mut self, session: SessionId, from: Option<ConversationId>, to: ConversationId) {
        if let Some(prev) = from {
            remove_from(&mut self.by_conversation, prev, &session);
        }
        self.by_conversation.entry(to).or_default().insert(session);
    }

    /// Drop `session` from every index it can be in.
    pub fn remove_session(
        &mut self,
        session: SessionId,
        user_id: UserId,
        conversation: Option<ConversationId>,
    ) {
        remove_from(&mut self.by_user, user_id, &session);
        if let Some(conv) = conversation {
            remove_from(&mut self.by_conversation, conv, &session);
        }
    }

    /// Forget `conversation_id` entirely. Returns the sessions that were in it.
    pub fn close_conversation(&mut self, conversation_id: ConversationId) -> Vec<SessionId> {
        self.by_conversation
            .remove(&conversation_id)
            .map(|s| s.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn conversation_sessions(&self, conversation_id: ConversationId) -> Vec<SessionId> {
        self.by_conversation
            .get(&conversation_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn user_sessions(&self, user_id: UserId) -> Vec<SessionId> {
        self.by_user
            .get(&user_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `session` appears in any index.
    pub fn contains(&self, session: &SessionId) -> bool {
        self.by_conversation.values().any(|s| s.contains(session))
            || self.by_user.values().any(|s| s.contains(session))
    }

    pub fn conversation_count(&self) -> usize {
        self.by_conversation.len()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }
}

fn remove_from<K: std::hash::Hash + Eq>(
    index: &mut HashMap<K, HashSet<SessionId>>,
    key: K,
    session: &SessionId,
) {
    if let Some(set) = index.get_mut(&key) {
        set.remove(session);
        if set.is_empty() {
            index.remove(&key);
        }
    }
}
