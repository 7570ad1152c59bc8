use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use kindred_types::api::{Claims, MatchCreatedResponse, MatchSummary, StatusMessage};
use kindred_types::models::{MatchId, UserId};

use crate::error::ApiError;
use crate::matching::LikeResult;
use crate::users::{load_profile, load_profiles_by_ids};
use crate::{AppState, blocking};

pub async fn list_matches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let matches = blocking(move || -> Result<Vec<MatchSummary>, ApiError> {
        let rows = db.active_matches_for(claims.sub)?;
        let others: Vec<UserId> = rows.iter().map(|r| r.other_user_id).collect();
        let mut profiles = load_profiles_by_ids(&db, &others)?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let user = profiles.remove(&r.other_user_id)?;
                Some(MatchSummary {
                    id: r.match_id,
                    conversation_id: r.conversation_id,
                    user,
                    created_at: r.created_at,
                })
            })
            .collect())
    })
    .await?;

    Ok(Json(json!({ "matches": matches })))
}

/// 201 with the match when the like completes a mutual pair, 200 otherwise.
pub async fn like_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<UserId>,
) -> Result<Response, ApiError> {
    let st = state.clone();
    let created = blocking(move || -> Result<Option<MatchSummary>, ApiError> {
        match st.engine.like(claims.sub, user_id)? {
            LikeResult::Liked => Ok(None),
            LikeResult::Matched { matched, conversation } => {
                let other = st
                    .db
                    .get_user(user_id)?
                    .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
                Ok(Some(MatchSummary {
                    id: matched.id,
                    conversation_id: Some(conversation.id),
                    user: load_profile(&st.db, other)?,
                    created_at: matched.created_at,
                }))
            }
        }
    })
    .await?;

    let response = match created {
        Some(matched) => (
            StatusCode::CREATED,
            Json(MatchCreatedResponse {
                message: "It's a match!".into(),
                matched,
            }),
        )
            .into_response(),
        None => Json(StatusMessage::new("User liked successfully")).into_response(),
    };
    Ok(response)
}

pub async fn dislike_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<UserId>,
) -> Result<Json<StatusMessage>, ApiError> {
    let st = state.clone();
    blocking(move || st.engine.dislike(claims.sub, user_id)).await?;
    Ok(Json(StatusMessage::new("User disliked successfully")))
}

pub async fn unmatch(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(match_id): Path<MatchId>,
) -> Result<Json<StatusMessage>, ApiError> {
    let st = state.clone();
    let closed = blocking(move || st.engine.unmatch(claims.sub, match_id)).await?;
    for conversation_id in closed {
        state.hub.close_conversation(conversation_id);
    }
    Ok(Json(StatusMessage::new("Unmatched successfully")))
}
