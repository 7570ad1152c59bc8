pub mod admin;
pub mod auth;
pub mod error;
pub mod extract;
pub mod matches;
pub mod matching;
pub mod messages;
pub mod middleware;
pub mod notify;
pub mod storage;
pub mod users;
pub mod ws;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use tracing::error;

use kindred_db::Database;
use kindred_gateway::Hub;

use crate::error::ApiError;
use crate::matching::MatchEngine;
use crate::notify::{HubNotifier, NotificationSink};
use crate::storage::BlobStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub hub: Hub,
    pub engine: MatchEngine,
    pub notifier: Arc<dyn NotificationSink>,
    pub blobs: Arc<dyn BlobStore>,
    pub settings: ApiSettings,
}

/// Knobs the handlers need, resolved from the environment by the server binary.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub refresh_expiry_days: i64,
    pub otp_enabled: bool,
    pub otp_expiry_minutes: i64,
    /// Largest accepted photo upload, in bytes.
    pub max_file_size: usize,
}

impl AppStateInner {
    /// Wire the production collaborators: notifications are persisted and pushed
    /// through the hub.
    pub fn new(
        db: Arc<Database>,
        hub: Hub,
        blobs: Arc<dyn BlobStore>,
        settings: ApiSettings,
    ) -> AppState {
        let notifier: Arc<dyn NotificationSink> =
            Arc::new(HubNotifier::new(db.clone(), hub.clone()));
        let engine = MatchEngine::new(db.clone(), notifier.clone());
        Arc::new(Self {
            db,
            hub,
            engine,
            notifier,
            blobs,
            settings,
        })
    }
}

/// Every REST and WebSocket route, ready to be nested under `/api/v1`.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/verify-otp", post(auth::verify_otp))
        .route("/auth/resend-otp", post(auth::resend_otp))
        .route("/auth/refresh", post(auth::refresh));

    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/users/profile", get(users::get_profile).put(users::update_profile))
        .route(
            "/users/profile/photo",
            post(users::upload_photo).layer(DefaultBodyLimit::max(state.settings.max_file_size)),
        )
        .route("/users/profile/photo/{photo_id}", delete(users::delete_photo))
        .route("/users/discover", get(users::discover))
        .route("/users/favorites", get(users::list_favorites))
        .route(
            "/users/favorites/{user_id}",
            post(users::add_favorite).delete(users::remove_favorite),
        )
        .route("/users/block/{user_id}", post(users::block_user).delete(users::unblock_user))
        .route("/users/report", post(users::report_user))
        .route("/matches", get(matches::list_matches))
        .route("/matches/like/{user_id}", post(matches::like_user))
        .route("/matches/dislike/{user_id}", post(matches::dislike_user))
        .route("/matches/{match_id}", delete(matches::unmatch))
        .route("/messages/conversations", get(messages::list_conversations))
        .route(
            "/messages/conversations/{conversation_id}",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/messages/conversations/{conversation_id}/read", put(messages::mark_read))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    let socket = Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_socket_auth));

    // Layers run outermost-last: authenticate, then check the admin role
    let admin = Router::new()
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/{user_id}", get(admin::get_user))
        .route("/admin/users/{user_id}/status", put(admin::update_user_status))
        .route("/admin/reports", get(admin::list_reports))
        .route("/admin/reports/{report_id}/status", put(admin::update_report_status))
        .route("/admin/analytics", get(admin::analytics))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_admin))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(socket)
        .merge(admin)
        .with_state(state)
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<T, E, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(Into::into)
}
