use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    ConversationId, Gender, MatchId, MessageId, MessageKind, ReportStatus, UserId, UserStatus,
};

// -- JWT Claims --

/// JWT claims shared across kindred-api (REST middleware, WebSocket upgrade) and the
/// integration tests that mint tokens directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub email: String,
    pub token_type: TokenType,
    pub exp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    /// `YYYY-MM-DD`
    pub date_of_birth: String,
    pub gender: Gender,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResendOtpRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserProfile,
}

/// Returned instead of tokens while OTP verification is pending. The code is echoed
/// because no SMS/email gateway is wired up.
#[derive(Debug, Serialize)]
pub struct OtpIssuedResponse {
    pub message: String,
    pub otp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// -- Profiles --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub phone: Option<String>,
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
    pub profile_photos: Vec<Photo>,
    pub interests: Vec<Interest>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: i64,
    pub url: String,
    pub is_primary: bool,
    pub order: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interest {
    pub id: i64,
    pub name: String,
    pub category: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Replaces the full interest set when present.
    pub interests: Option<Vec<i64>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: i64) -> Self {
        let limit_i = i64::from(limit.max(1));
        Self {
            page,
            limit,
            total,
            total_pages: (total + limit_i - 1) / limit_i,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DiscoverResponse {
    pub users: Vec<UserProfile>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportUserRequest {
    pub reported_id: UserId,
    pub reason: String,
    #[serde(default)]
    pub description: Option<String>,
}

// -- Matches --

#[derive(Debug, Serialize, Deserialize)]
pub struct MatchSummary {
    pub id: MatchId,
    pub conversation_id: Option<ConversationId>,
    pub user: UserProfile,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MatchCreatedResponse {
    pub message: String,
    #[serde(rename = "match")]
    pub matched: MatchSummary,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub message_type: Option<MessageKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageKind,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub match_id: MatchId,
    pub other_user: UserProfile,
    pub last_message: Option<ChatMessage>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Admin --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBrief {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserListResponse {
    pub users: Vec<UserProfile>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub reason: String,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub reporter: UserBrief,
    pub reported: UserBrief,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportListResponse {
    pub reports: Vec<Report>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub user_id: UserId,
    pub action: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminUserDetail {
    pub user: UserProfile,
    pub activities: Vec<Activity>,
    pub reports: Vec<Report>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserStatusRequest {
    pub status: UserStatus,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateReportStatusRequest {
    pub status: ReportStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Analytics {
    pub total_users: i64,
    pub active_users: i64,
    pub new_users_today: i64,
    pub total_matches: i64,
    pub matches_today: i64,
    pub total_messages: i64,
    pub messages_today: i64,
    pub pending_reports: i64,
    pub live_sessions: usize,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenderCount {
    pub gender: String,
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyticsResponse {
    pub analytics: Analytics,
    pub daily_registrations: Vec<DailyCount>,
    pub gender_distribution: Vec<GenderCount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_rounds_pages_up() {
        let p = Pagination::new(1, 20, 41);
        assert_eq!(p.total_pages, 3);
        assert_eq!(Pagination::new(1, 20, 0).total_pages, 0);
        assert_eq!(Pagination::new(2, 20, 40).total_pages, 2);
    }

    #[test]
    fn register_request_rejects_unknown_fields() {
        let raw = r#"{"email":"a@b.c","password":"12345678","first_name":"A","last_name":"B",
            "date_of_birth":"1990-01-01","gender":"female","admin":true}"#;
        assert!(serde_json::from_str::<RegisterRequest>(raw).is_err());
    }
}
