use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use kindred_db::Database;
use kindred_db::models::{ConversationAccess, MessageRow};
use kindred_gateway::encode_frame;
use kindred_types::api::{
    ChatMessage, Claims, ConversationSummary, Pagination, SendMessageRequest, StatusMessage,
};
use kindred_types::events::ServerFrame;
use kindred_types::models::{ConversationId, MessageId, UserId};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::notify::{Notification, notify_quietly};
use crate::users::load_profiles_by_ids;
use crate::{AppState, blocking};

const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    50
}

fn chat_message(row: MessageRow) -> ChatMessage {
    ChatMessage {
        id: row.id,
        conversation_id: row.conversation_id,
        sender_id: row.sender_id,
        content: row.content,
        message_type: row.message_type,
        is_read: row.is_read,
        read_at: row.read_at,
        created_at: row.created_at,
    }
}

fn require_access(
    db: &Database,
    user_id: UserId,
    conversation_id: ConversationId,
) -> Result<ConversationAccess, ApiError> {
    db.conversation_access(user_id, conversation_id)?
        .ok_or_else(|| ApiError::Forbidden("Access denied to this conversation".into()))
}

/// Active conversations with the counterpart, newest message and unread count.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let conversations = blocking(move || -> Result<Vec<ConversationSummary>, ApiError> {
        let rows = db.conversations_for(claims.sub)?;

        let others: Vec<UserId> = rows.iter().map(|r| r.other_user_id).collect();
        let mut profiles = load_profiles_by_ids(&db, &others)?;

        let last_ids: Vec<MessageId> = rows.iter().filter_map(|r| r.last_message_id).collect();
        let mut last_messages: HashMap<MessageId, ChatMessage> = db
            .messages_by_ids(&last_ids)?
            .into_iter()
            .map(|m| (m.id, chat_message(m)))
            .collect();

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let other_user = profiles.remove(&r.other_user_id)?;
                Some(ConversationSummary {
                    id: r.conversation_id,
                    match_id: r.match_id,
                    other_user,
                    last_message: r.last_message_id.and_then(|id| last_messages.remove(&id)),
                    unread_count: r.unread_count,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                })
            })
            .collect())
    })
    .await?;

    Ok(Json(json!({ "conversations": conversations })))
}

/// Messages in send order. Fetching marks everything the caller received as read.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 100);

    let db = state.db.clone();
    let (total, messages) = blocking(move || -> Result<_, ApiError> {
        require_access(&db, claims.sub, conversation_id)?;
        let (total, rows) =
            db.get_messages(conversation_id, (page - 1).saturating_mul(limit), limit)?;
        let marked = db.mark_read(conversation_id, claims.sub)?;
        if marked > 0 {
            debug!(
                "user {} read {} messages in conversation {}",
                claims.sub, marked, conversation_id
            );
        }
        Ok((total, rows.into_iter().map(chat_message).collect::<Vec<_>>()))
    })
    .await?;

    Ok(Json(json!({
        "messages": messages,
        "pagination": Pagination::new(page, limit, total),
    })))
}

/// Persist, then fan out to sessions joined to the conversation, then notify the
/// counterpart. The persisted row is the source of truth for offline recipients.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<ConversationId>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("content is required".into()));
    }
    if content.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::BadRequest(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_LEN
        )));
    }
    let kind = req.message_type.unwrap_or_default();

    let st = state.clone();
    let message = blocking(move || -> Result<ChatMessage, ApiError> {
        let access = require_access(&st.db, claims.sub, conversation_id)?;
        let row = st.db.insert_message(conversation_id, claims.sub, &content, kind)?;

        let frame = ServerFrame::Message {
            conversation_id,
            sender_id: row.sender_id,
            content: row.content.clone(),
            message_type: row.message_type,
            timestamp: row.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        match encode_frame(&frame) {
            Ok(bytes) => st.hub.broadcast_to_conversation(conversation_id, bytes),
            Err(e) => warn!("Failed to encode message frame: {}", e),
        }

        notify_quietly(
            st.notifier.as_ref(),
            access.other_user_id,
            &Notification::new_message(conversation_id, &row.content),
        );
        Ok(chat_message(row))
    })
    .await?;

    Ok((StatusCode::CREATED, Json(json!({ "message": message }))))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<StatusMessage>, ApiError> {
    let db = state.db.clone();
    blocking(move || -> Result<usize, ApiError> {
        require_access(&db, claims.sub, conversation_id)?;
        Ok(db.mark_read(conversation_id, claims.sub)?)
    })
    .await?;

    Ok(Json(StatusMessage::new("Messages marked as read")))
}
