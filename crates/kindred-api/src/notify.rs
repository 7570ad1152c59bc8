//! Per-user notifications: persisted, then pushed to the user's live sockets.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use kindred_db::Database;
use kindred_gateway::{Hub, encode_frame};
use kindred_types::events::ServerFrame;
use kindred_types::models::{NotificationKind, UserId};

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new_match(match_id: i64) -> Self {
        Self {
            kind: NotificationKind::Match,
            title: "New Match!".into(),
            body: "You have a new match! Start chatting now.".into(),
            data: serde_json::json!({ "match_id": match_id }),
        }
    }

    pub fn new_message(conversation_id: i64, content: &str) -> Self {
        Self {
            kind: NotificationKind::Message,
            title: "New Message".into(),
            body: content.to_string(),
            data: serde_json::json!({ "conversation_id": conversation_id }),
        }
    }
}

/// Where match and message notifications go. Callers log failures and carry on.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, user_id: UserId, notification: &Notification) -> Result<()>;
}

/// Stores the notification row and pushes a `notification` frame through the hub.
pub struct HubNotifier {
    db: Arc<Database>,
    hub: Hub,
}

impl HubNotifier {
    pub fn new(db: Arc<Database>, hub: Hub) -> Self {
        Self { db, hub }
    }
}

impl NotificationSink for HubNotifier {
    fn notify(&self, user_id: UserId, n: &Notification) -> Result<()> {
        self.db
            .insert_notification(user_id, n.kind, &n.title, &n.body, &n.data.to_string())?;

        let frame = encode_frame(&ServerFrame::Notification {
            kind: n.kind,
            title: n.title.clone(),
            body: n.body.clone(),
            data: n.data.clone(),
        })?;
        self.hub.broadcast_to_user(user_id, frame);

        // No mobile push gateway is configured
        debug!("push notification to user {}: {}", user_id, n.title);
        Ok(())
    }
}

/// Deliver `notification`, logging instead of failing.
pub(crate) fn notify_quietly(
    sink: &dyn NotificationSink,
    user_id: UserId,
    notification: &Notification,
) {
    if let Err(e) = sink.notify(user_id, notification) {
        warn!("Failed to notify user {}: {:#}", user_id, e);
    }
}
