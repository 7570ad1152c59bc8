use std::sync::Arc;

use axum::{
    Extension,
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures_util::future::BoxFuture;
use tracing::{error, warn};

use kindred_db::Database;
use kindred_gateway::{JoinPolicy, run_session};
use kindred_types::api::Claims;
use kindred_types::models::{ConversationId, UserId};

use crate::error::ApiError;
use crate::{AppState, blocking};

/// Sessions may only join conversations of their own active matches.
pub struct ParticipantPolicy {
    db: Arc<Database>,
}

impl ParticipantPolicy {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl JoinPolicy for ParticipantPolicy {
    fn may_join(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, bool> {
        let db = self.db.clone();
        Box::pin(async move {
            let check = move || db.conversation_access(user_id, conversation_id);
            match tokio::task::spawn_blocking(check).await {
                Ok(Ok(access)) => access.is_some(),
                Ok(Err(e)) => {
                    warn!("conversation access check failed: {:#}", e);
                    false
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    false
                }
            }
        })
    }
}

/// `GET /ws`. Authentication already happened in `require_auth`, so an anonymous
/// upgrade never reaches the hub.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = claims.sub;
    let db = state.db.clone();
    let active = blocking(move || db.get_user(user_id))
        .await?
        .is_some_and(|u| u.is_active);
    if !active {
        return Err(ApiError::Unauthorized("Account is deactivated".into()));
    }

    Ok(ws.on_upgrade(move |socket| async move {
        set_presence(&state, user_id, true).await;
        let policy: Arc<dyn JoinPolicy> = Arc::new(ParticipantPolicy::new(state.db.clone()));
        run_session(socket, state.hub.clone(), user_id, policy).await;
        set_presence(&state, user_id, false).await;
    }))
}

async fn set_presence(state: &AppState, user_id: UserId, online: bool) {
    let db = state.db.clone();
    if let Err(e) = blocking(move || db.set_online(user_id, online)).await {
        warn!("Failed to update presence for user {}: {}", user_id, e);
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use kindred_db::models::{LikeOutcome, NewUser};
    use kindred_types::models::Gender;

    use super::*;

    fn user(db: &Database, email: &str) -> UserId {
        db.create_user(&NewUser {
            email: email.into(),
            phone: None,
            password_hash: "x".into(),
            first_name: "W".into(),
            last_name: "S".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1992, 8, 1).unwrap(),
            gender: Gender::Female,
            is_verified: true,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn only_participants_may_join() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (a, b, c) = (user(&db, "a@x.io"), user(&db, "b@x.io"), user(&db, "c@x.io"));
        db.record_like(a, b).unwrap();
        let LikeOutcome::Matched { matched, conversation } = db.record_like(b, a).unwrap() else {
            panic!("expected a match");
        };

        let policy = ParticipantPolicy::new(db.clone());
        assert!(policy.may_join(a, conversation.id).await);
        assert!(policy.may_join(b, conversation.id).await);
        assert!(!policy.may_join(c, conversation.id).await);

        db.deactivate_match(a, matched.id).unwrap();
        assert!(!policy.may_join(a, conversation.id).await);
    }
}
