use anyhow::Result;
use rusqlite::{Connection, Row, TransactionBehavior};

use kindred_types::models::{ConversationId, MatchId, UserId};

use super::OptionalExt;
use crate::Database;
use crate::models::{ConversationRow, LikeOutcome, MatchListRow, MatchRow, parse_timestamp};

const MATCH_COLUMNS: &str = "id, user_a, user_b, is_active, created_at";
const CONVERSATION_COLUMNS: &str = "id, match_id, is_active, created_at, updated_at";

impl Database {
    /// Record `liker -> liked` and, if the reverse like exists, create the match and its
    /// conversation. Everything happens in one IMMEDIATE transaction so two crossing
    /// likes serialize: exactly one of them observes the other and forms the match.
    pub fn record_like(&self, liker: UserId, liked: UserId) -> Result<LikeOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if like_exists(&tx, liker, liked)? {
                return Ok(LikeOutcome::AlreadyLiked);
            }

            let blocked: i64 = tx.query_row(
                "SELECT COUNT(*) FROM blocked_users WHERE blocker_id = ?1 AND blocked_id = ?2",
                [liker, liked],
                |r| r.get(0),
            )?;
            if blocked > 0 {
                return Ok(LikeOutcome::Blocked);
            }

            tx.execute("INSERT INTO likes (liker_id, liked_id) VALUES (?1, ?2)", [liker, liked])?;

            if !like_exists(&tx, liked, liker)? {
                tx.commit()?;
                return Ok(LikeOutcome::Liked);
            }

            let (low, high) = if liker < liked { (liker, liked) } else { (liked, liker) };
            let already_matched: i64 = tx.query_row(
                "SELECT COUNT(*) FROM matches
                 WHERE pair_low = ?1 AND pair_high = ?2 AND is_active = 1",
                [low, high],
                |r| r.get(0),
            )?;
            if already_matched > 0 {
                tx.commit()?;
                return Ok(LikeOutcome::Liked);
            }

            tx.execute(
                "INSERT INTO matches (user_a, user_b, pair_low, pair_high) VALUES (?1, ?2, ?3, ?4)",
                [liker, liked, low, high],
            )?;
            let match_id = tx.last_insert_rowid();
            tx.execute("INSERT INTO conversations (match_id) VALUES (?1)", [match_id])?;
            let conversation_id = tx.last_insert_rowid();

            let matched = fetch_match(&tx, match_id)?;
            let conversation = fetch_conversation(&tx, conversation_id)?;
            tx.commit()?;

            Ok(LikeOutcome::Matched {
                matched,
                conversation,
            })
        })
    }

    /// Returns false if the pair was already disliked.
    pub fn record_dislike(&self, disliker: UserId, disliked: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO dislikes (disliker_id, disliked_id) VALUES (?1, ?2)",
                [disliker, disliked],
            )?;
            Ok(n > 0)
        })
    }

    pub fn has_liked(&self, liker: UserId, liked: UserId) -> Result<bool> {
        self.with_conn(|conn| like_exists(conn, liker, liked))
    }

    /// Deactivate an active match the requester participates in, along with its
    /// conversation. Returns false if no such match exists. Likes are kept.
    pub fn deactivate_match(&self, requester: UserId, match_id: MatchId) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let n = tx.execute(
                "UPDATE matches SET is_active = 0, updated_at = datetime('now')
                 WHERE id = ?1 AND is_active = 1 AND (user_a = ?2 OR user_b = ?2)",
                [match_id, requester],
            )?;
            if n == 0 {
                return Ok(false);
            }
            tx.execute(
                "UPDATE conversations SET is_active = 0, updated_at = datetime('now')
                 WHERE match_id = ?1",
                [match_id],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Active matches of `user_id`, newest first.
    pub fn active_matches_for(&self, user_id: UserId) -> Result<Vec<MatchListRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id,
                        CASE WHEN m.user_a = ?1 THEN m.user_b ELSE m.user_a END,
                        c.id,
                        m.created_at
                 FROM matches m
                 LEFT JOIN conversations c ON c.match_id = m.id AND c.is_active = 1
                 WHERE m.is_active = 1 AND (m.user_a = ?1 OR m.user_b = ?1)
                 ORDER BY m.id DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(MatchListRow {
                        match_id: row.get(0)?,
                        other_user_id: row.get(1)?,
                        conversation_id: row.get(2)?,
                        created_at: parse_timestamp(&row.get::<_, String>(3)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_match(&self, match_id: MatchId) -> Result<Option<MatchRow>> {
        self.with_conn(|conn| fetch_match(conn, match_id).optional())
    }

    pub fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| fetch_conversation(conn, conversation_id).optional())
    }

    pub fn conversations_for_match(&self, match_id: MatchId) -> Result<Vec<ConversationId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM conversations WHERE match_id = ?1")?;
            let ids = stmt
                .query_map([match_id], |r| r.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

fn like_exists(conn: &Connection, liker: UserId, liked: UserId) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM likes WHERE liker_id = ?1 AND liked_id = ?2",
        [liker, liked],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn fetch_match(conn: &Connection, id: MatchId) -> rusqlite::Result<MatchRow> {
    conn.query_row(
        &format!("SELECT {} FROM matches WHERE id = ?1", MATCH_COLUMNS),
        [id],
        match_from_row,
    )
}

fn fetch_conversation(conn: &Connection, id: ConversationId) -> rusqlite::Result<ConversationRow> {
    conn.query_row(
        &format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS),
        [id],
        |row| {
            Ok(ConversationRow {
                id: row.get(0)?,
                match_id: row.get(1)?,
                is_active: row.get(2)?,
                created_at: parse_timestamp(&row.get::<_, String>(3)?),
                updated_at: parse_timestamp(&row.get::<_, String>(4)?),
            })
        },
    )
}

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<MatchRow> {
    Ok(MatchRow {
        id: row.get(0)?,
        user_a: row.get(1)?,
        user_b: row.get(2)?,
        is_active: row.get(3)?,
        created_at: parse_timestamp(&row.get::<_, String>(4)?),
    })
}
