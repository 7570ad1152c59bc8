//! Like / dislike / unmatch rules on top of the match-formation transaction.

use std::sync::Arc;

use kindred_db::Database;
use kindred_db::models::{ConversationRow, LikeOutcome, MatchRow};
use kindred_types::models::{ConversationId, MatchId, UserId};
use tracing::info;

use crate::error::ApiError;
use crate::notify::{Notification, NotificationSink, notify_quietly};

#[derive(Debug, Clone)]
pub enum LikeResult {
    Liked,
    Matched {
        matched: MatchRow,
        conversation: ConversationRow,
    },
}

/// Synchronous: every call touches SQLite, so handlers run it inside `spawn_blocking`.
pub struct MatchEngine {
    db: Arc<Database>,
    notifier: Arc<dyn NotificationSink>,
}

impl MatchEngine {
    pub fn new(db: Arc<Database>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { db, notifier }
    }

    pub fn like(&self, liker: UserId, liked: UserId) -> Result<LikeResult, ApiError> {
        if liker == liked {
            return Err(ApiError::BadRequest("You cannot like yourself".into()));
        }
        self.require_active(liked)?;

        match self.db.record_like(liker, liked)? {
            LikeOutcome::AlreadyLiked => {
                Err(ApiError::Conflict("You have already liked this user".into()))
            }
            LikeOutcome::Blocked => Err(ApiError::Forbidden("You have blocked this user".into())),
            LikeOutcome::Liked => Ok(LikeResult::Liked),
            LikeOutcome::Matched { matched, conversation } => {
                info!("users {} and {} matched (match {})", liker, liked, matched.id);
                let notification = Notification::new_match(matched.id);
                notify_quietly(self.notifier.as_ref(), liker, &notification);
                notify_quietly(self.notifier.as_ref(), liked, &notification);
                Ok(LikeResult::Matched { matched, conversation })
            }
        }
    }

    pub fn dislike(&self, disliker: UserId, disliked: UserId) -> Result<(), ApiError> {
        if disliker == disliked {
            return Err(ApiError::BadRequest("You cannot dislike yourself".into()));
        }
        self.require_active(disliked)?;

        if !self.db.record_dislike(disliker, disliked)? {
            return Err(ApiError::Conflict("You have already disliked this user".into()));
        }
        Ok(())
    }

    /// Deactivate an active match the requester takes part in, along with its conversation.
    /// Returns the conversations that were closed so live sessions can be detached.
    pub fn unmatch(
        &self,
        requester: UserId,
        match_id: MatchId,
    ) -> Result<Vec<ConversationId>, ApiError> {
        if !self.db.deactivate_match(requester, match_id)? {
            return Err(ApiError::NotFound("Match not found".into()));
        }
        info!("user {} ended match {}", requester, match_id);
        Ok(self.db.conversations_for_match(match_id)?)
    }

    fn require_active(&self, user_id: UserId) -> Result<(), ApiError> {
        match self.db.get_user(user_id)? {
            Some(user) if user.is_active => Ok(()),
            _ => Err(ApiError::NotFound("User not found".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use kindred_db::models::NewUser;
    use kindred_types::models::{Gender, NotificationKind};

    use super::*;
    use crate::notify::testing::RecordingSink;

    fn setup() -> (Arc<Database>, Arc<RecordingSink>, MatchEngine) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let sink = Arc::new(RecordingSink::default());
        let engine = MatchEngine::new(db.clone(), sink.clone());
        (db, sink, engine)
    }

    fn user(db: &Database, email: &str) -> UserId {
        db.create_user(&NewUser {
            email: email.into(),
            phone: None,
            password_hash: "x".into(),
            first_name: "T".into(),
            last_name: "U".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1994, 2, 3).unwrap(),
            gender: Gender::Other,
            is_verified: true,
        })
        .unwrap()
    }

    #[test]
    fn second_like_of_the_same_pair_conflicts() {
        let (db, _, engine) = setup();
        let (a, b) = (user(&db, "a@x.io"), user(&db, "b@x.io"));

        assert!(matches!(engine.like(a, b), Ok(LikeResult::Liked)));
        assert!(matches!(engine.like(a, b), Err(ApiError::Conflict(_))));
    }

    #[test]
    fn mutual_like_matches_and_notifies_both() {
        let (db, sink, engine) = setup();
        let (a, b) = (user(&db, "a@x.io"), user(&db, "b@x.io"));

        engine.like(a, b).unwrap();
        let LikeResult::Matched { matched, conversation } = engine.like(b, a).unwrap() else {
            panic!("expected a match");
        };
        assert_eq!((matched.user_a, matched.user_b), (b, a));
        assert!(conversation.is_active);
        assert_eq!(conversation.match_id, matched.id);

        let sent = sink.sent.lock().unwrap();
        let recipients: Vec<UserId> = sent.iter().map(|(u, _)| *u).collect();
        assert_eq!(recipients, vec![b, a]);
        assert!(sent.iter().all(|(_, n)| n.kind == NotificationKind::Match));
    }

    #[test]
    fn failing_sink_does_not_fail_the_match() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let sink = Arc::new(RecordingSink { fail: true, ..Default::default() });
        let engine = MatchEngine::new(db.clone(), sink);
        let (a, b) = (user(&db, "a@x.io"), user(&db, "b@x.io"));

        engine.like(a, b).unwrap();
        assert!(matches!(engine.like(b, a), Ok(LikeResult::Matched { .. })));
    }

    #[test]
    fn third_party_cannot_unmatch() {
        let (db, _, engine) = setup();
        let (a, b, c) = (user(&db, "a@x.io"), user(&db, "b@x.io"), user(&db, "c@x.io"));
        engine.like(a, b).unwrap();
        let LikeResult::Matched { matched, conversation } = engine.like(b, a).unwrap() else {
            panic!("expected a match");
        };

        assert!(matches!(engine.unmatch(c, matched.id), Err(ApiError::NotFound(_))));
        assert_eq!(engine.unmatch(a, matched.id).unwrap(), vec![conversation.id]);
        assert!(matches!(engine.unmatch(a, matched.id), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn relike_after_unmatch_conflicts() {
        let (db, _, engine) = setup();
        let (a, b) = (user(&db, "a@x.io"), user(&db, "b@x.io"));
        engine.like(a, b).unwrap();
        let LikeResult::Matched { matched, .. } = engine.like(b, a).unwrap() else {
            panic!("expected a match");
        };
        engine.unmatch(b, matched.id).unwrap();

        assert!(matches!(engine.like(a, b), Err(ApiError::Conflict(_))));
    }

    #[test]
    fn dislike_keeps_the_earlier_like() {
        let (db, _, engine) = setup();
        let (a, b) = (user(&db, "a@x.io"), user(&db, "b@x.io"));

        engine.like(a, b).unwrap();
        engine.dislike(a, b).unwrap();
        assert!(matches!(engine.dislike(a, b), Err(ApiError::Conflict(_))));
        assert!(matches!(engine.like(b, a), Ok(LikeResult::Matched { .. })));
    }

    #[test]
    fn block_only_stops_the_blocker() {
        let (db, _, engine) = setup();
        let (a, b) = (user(&db, "a@x.io"), user(&db, "b@x.io"));
        db.block_user(a, b).unwrap();

        assert!(matches!(engine.like(a, b), Err(ApiError::Forbidden(_))));
        assert!(matches!(engine.like(b, a), Ok(LikeResult::Liked)));
    }

    #[test]
    fn self_and_missing_targets_are_rejected() {
        let (db, _, engine) = setup();
        let a = user(&db, "a@x.io");
        let b = user(&db, "b@x.io");
        db.set_active(b, false).unwrap();

        assert!(matches!(engine.like(a, a), Err(ApiError::BadRequest(_))));
        assert!(matches!(engine.like(a, 9999), Err(ApiError::NotFound(_))));
        assert!(matches!(engine.like(a, b), Err(ApiError::NotFound(_))));
        assert!(matches!(engine.dislike(a, 9999), Err(ApiError::NotFound(_))));
    }
}
