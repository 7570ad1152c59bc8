use anyhow::Result;

use kindred_types::models::{ConversationId, MessageId, MessageKind, NotificationKind, UserId};

use super::{OptionalExt, placeholders};
use crate::Database;
use crate::models::{
    ConversationAccess, ConversationOverviewRow, MESSAGE_COLUMNS, MessageRow, parse_timestamp,
};

impl Database {
    // -- Conversations --

    /// Resolve `conversation_id` for a participant. `None` unless the conversation and
    /// its match are both active and `user_id` belongs to the match.
    pub fn conversation_access(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationAccess>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT c.id, m.id, CASE WHEN m.user_a = ?2 THEN m.user_b ELSE m.user_a END
                 FROM conversations c
                 JOIN matches m ON m.id = c.match_id
                 WHERE c.id = ?1 AND c.is_active = 1 AND m.is_active = 1
                   AND (m.user_a = ?2 OR m.user_b = ?2)",
                [conversation_id, user_id],
                |row| {
                    Ok(ConversationAccess {
                        conversation_id: row.get(0)?,
                        match_id: row.get(1)?,
                        other_user_id: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Active conversations of `user_id`, most recently active first.
    pub fn conversations_for(&self, user_id: UserId) -> Result<Vec<ConversationOverviewRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id,
                        m.id,
                        CASE WHEN m.user_a = ?1 THEN m.user_b ELSE m.user_a END,
                        (SELECT COUNT(*) FROM messages x
                          WHERE x.conversation_id = c.id AND x.sender_id != ?1 AND x.is_read = 0),
                        (SELECT MAX(x.id) FROM messages x WHERE x.conversation_id = c.id),
                        c.created_at,
                        c.updated_at
                 FROM conversations c
                 JOIN matches m ON m.id = c.match_id
                 WHERE c.is_active = 1 AND m.is_active = 1 AND (m.user_a = ?1 OR m.user_b = ?1)
                 ORDER BY c.updated_at DESC, c.id DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationOverviewRow {
                        conversation_id: row.get(0)?,
                        match_id: row.get(1)?,
                        other_user_id: row.get(2)?,
                        unread_count: row.get(3)?,
                        last_message_id: row.get(4)?,
                        created_at: parse_timestamp(&row.get::<_, String>(5)?),
                        updated_at: parse_timestamp(&row.get::<_, String>(6)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Persist a message and bump the conversation's activity time.
    pub fn insert_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (conversation_id, sender_id, content, message_type)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![conversation_id, sender_id, content, kind.as_str()],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE conversations SET updated_at = datetime('now') WHERE id = ?1",
                [conversation_id],
            )?;
            let row = tx.query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                [id],
                MessageRow::from_row,
            )?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// One page of a conversation's messages in ascending id order, plus the total.
    pub fn get_messages(
        &self,
        conversation_id: ConversationId,
        offset: u32,
        limit: u32,
    ) -> Result<(i64, Vec<MessageRow>)> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |r| r.get(0),
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE conversation_id = ?1
                 ORDER BY id ASC LIMIT ?2 OFFSET ?3",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, limit, offset],
                    MessageRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((total, rows))
        })
    }

    pub fn messages_by_ids(&self, ids: &[MessageId]) -> Result<Vec<MessageRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE id IN ({})",
                MESSAGE_COLUMNS,
                placeholders(1, ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark everything `reader` received in the conversation as read. Returns the
    /// number of messages updated.
    pub fn mark_read(&self, conversation_id: ConversationId, reader: UserId) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET is_read = 1, read_at = datetime('now')
                 WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0",
                [conversation_id, reader],
            )?;
            Ok(n)
        })
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        user_id: UserId,
        kind: NotificationKind,
        title: &str,
        body: &str,
        data: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (user_id, kind, title, body, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![user_id, kind.as_str(), title, body, data],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LikeOutcome;
    use crate::test_support::{db, user};

    fn matched_pair(db: &Database) -> (UserId, UserId, ConversationId) {
        let a = user(db, "a@example.com");
        let b = user(db, "b@example.com");
        db.record_like(a, b).unwrap();
        match db.record_like(b, a).unwrap() {
            LikeOutcome::Matched { conversation, .. } => (a, b, conversation.id),
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn access_requires_participation_and_active_match() {
        let db = db();
        let (a, b, conv) = matched_pair(&db);
        let outsider = user(&db, "c@example.com");

        let access = db.conversation_access(a, conv).unwrap().unwrap();
        assert_eq!(access.other_user_id, b);
        assert!(db.conversation_access(outsider, conv).unwrap().is_none());

        db.deactivate_match(b, access.match_id).unwrap();
        assert!(db.conversation_access(a, conv).unwrap().is_none());
    }

    #[test]
    fn messages_come_back_in_send_order() {
        let db = db();
        let (a, b, conv) = matched_pair(&db);

        db.insert_message(conv, a, "selam", MessageKind::Text).unwrap();
        db.insert_message(conv, b, "hi!", MessageKind::Text).unwrap();
        db.insert_message(conv, a, "👋", MessageKind::Emoji).unwrap();

        let (total, page) = db.get_messages(conv, 0, 2).unwrap();
        assert_eq!(total, 3);
        let contents: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["selam", "hi!"]);

        let (_, rest) = db.get_messages(conv, 2, 2).unwrap();
        assert_eq!(rest[0].message_type, MessageKind::Emoji);
    }

    #[test]
    fn unread_counts_only_incoming_messages() {
        let db = db();
        let (a, b, conv) = matched_pair(&db);

        db.insert_message(conv, a, "one", MessageKind::Text).unwrap();
        let last = db.insert_message(conv, a, "two", MessageKind::Text).unwrap();
        db.insert_message(conv, b, "mine", MessageKind::Text).unwrap();

        let overview = db.conversations_for(b).unwrap();
        assert_eq!(overview.len(), 1);
        assert_eq!(overview[0].unread_count, 2);
        assert!(overview[0].last_message_id.unwrap() > last.id);

        assert_eq!(db.mark_read(conv, b).unwrap(), 2);
        assert_eq!(db.conversations_for(b).unwrap()[0].unread_count, 0);
        assert_eq!(db.conversations_for(a).unwrap()[0].unread_count, 1);
    }

    #[test]
    fn notifications_are_persisted() {
        let db = db();
        let a = user(&db, "a@example.com");
        let id = db
            .insert_notification(a, NotificationKind::Match, "New match", "You matched", "{}")
            .unwrap();
        assert!(id > 0);
    }
}
