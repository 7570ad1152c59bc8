//! Database row types. These map directly to SQLite rows and stay distinct from the
//! kindred-types API models to keep the DB layer independent.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use std::str::FromStr;
use tracing::warn;

use kindred_types::models::{
    AdminRole, ConversationId, Gender, MatchId, MessageId, MessageKind, ReportStatus, UserId,
};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: UserId,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_verified: bool,
    pub is_active: bool,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Column list matching [`UserRow::from_row`].
pub(crate) const USER_COLUMNS: &str = "id, email, phone, password, first_name, last_name, \
     date_of_birth, gender, bio, location, latitude, longitude, is_verified, is_active, \
     is_online, last_seen, created_at";

impl UserRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            phone: row.get(2)?,
            password: row.get(3)?,
            first_name: row.get(4)?,
            last_name: row.get(5)?,
            date_of_birth: parse_column::<NaiveDate>(row, 6)?,
            gender: parse_column(row, 7)?,
            bio: row.get(8)?,
            location: row.get(9)?,
            latitude: row.get(10)?,
            longitude: row.get(11)?,
            is_verified: row.get(12)?,
            is_active: row.get(13)?,
            is_online: row.get(14)?,
            last_seen: row.get::<_, Option<String>>(15)?.map(|s| parse_timestamp(&s)),
            created_at: parse_timestamp(&row.get::<_, String>(16)?),
        })
    }
}

/// Fields needed to create an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub is_verified: bool,
}

#[derive(Debug, Clone)]
pub struct PhotoRow {
    pub id: i64,
    pub user_id: UserId,
    pub url: String,
    pub storage_key: String,
    pub is_primary: bool,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InterestRow {
    pub id: i64,
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone)]
pub struct MatchRow {
    pub id: MatchId,
    pub user_a: UserId,
    pub user_b: UserId,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl MatchRow {
    /// The participant that is not `user_id`.
    pub fn other(&self, user_id: UserId) -> UserId {
        if self.user_a == user_id { self.user_b } else { self.user_a }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: ConversationId,
    pub match_id: MatchId,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of recording a like inside the match-formation transaction.
#[derive(Debug, Clone)]
pub enum LikeOutcome {
    /// The ordered pair was already liked; nothing written.
    AlreadyLiked,
    /// The liker has blocked the liked user; nothing written.
    Blocked,
    /// Like stored, no reverse like yet.
    Liked,
    /// Like stored and it completed a mutual pair.
    Matched {
        matched: MatchRow,
        conversation: ConversationRow,
    },
}

/// An active match seen from one participant.
#[derive(Debug, Clone)]
pub struct MatchListRow {
    pub match_id: MatchId,
    pub other_user_id: UserId,
    pub conversation_id: Option<ConversationId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageKind,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, message_type, is_read, read_at, created_at";

impl MessageRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            sender_id: row.get(2)?,
            content: row.get(3)?,
            message_type: parse_column(row, 4)?,
            is_read: row.get(5)?,
            read_at: row.get::<_, Option<String>>(6)?.map(|s| parse_timestamp(&s)),
            created_at: parse_timestamp(&row.get::<_, String>(7)?),
        })
    }
}

/// A participant's view of one active conversation they belong to.
#[derive(Debug, Clone)]
pub struct ConversationAccess {
    pub conversation_id: ConversationId,
    pub match_id: MatchId,
    pub other_user_id: UserId,
}

/// One row of the conversation list: conversation, counterpart, unread count and the id
/// of the newest message (if any).
#[derive(Debug, Clone)]
pub struct ConversationOverviewRow {
    pub conversation_id: ConversationId,
    pub match_id: MatchId,
    pub other_user_id: UserId,
    pub unread_count: i64,
    pub last_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UserBriefRow {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone)]
pub struct ReportRow {
    pub id: i64,
    pub reason: String,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub reporter: UserBriefRow,
    pub reported: UserBriefRow,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ActivityRow {
    pub id: i64,
    pub user_id: UserId,
    pub action: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AdminRow {
    pub user_id: UserId,
    pub role: AdminRole,
    pub is_active: bool,
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone; RFC 3339 is
/// accepted too. Unparseable values are logged and mapped to the epoch.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

/// Read a TEXT column and parse it with `FromStr`, surfacing failures as a rusqlite
/// conversion error on that column.
pub(crate) fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
