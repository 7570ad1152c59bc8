use std::collections::HashMap;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::{Months, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use kindred_db::models::{PhotoRow, UserRow};
use kindred_db::{Database, DiscoverFilter, ProfileChanges};
use kindred_types::api::{
    Claims, DiscoverResponse, Interest, Pagination, Photo, ReportUserRequest, StatusMessage,
    UpdateProfileRequest, UserProfile,
};
use kindred_types::models::{Gender, UserId};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::storage::image_extension;
use crate::{AppState, blocking};

const DISCOVER_DEFAULT_LIMIT: u32 = 20;
const DISCOVER_MAX_LIMIT: u32 = 50;
const MAX_AGE: u32 = 120;

// -- Profile assembly --

/// Attach photos and interests to a batch of users with two queries in total.
pub(crate) fn load_profiles(
    db: &Database,
    users: Vec<UserRow>,
) -> anyhow::Result<Vec<UserProfile>> {
    let ids: Vec<UserId> = users.iter().map(|u| u.id).collect();

    let mut photos: HashMap<UserId, Vec<Photo>> = HashMap::new();
    for row in db.photos_for_users(&ids)? {
        photos.entry(row.user_id).or_default().push(photo(row));
    }
    let mut interests: HashMap<UserId, Vec<Interest>> = HashMap::new();
    for (user_id, row) in db.interests_for_users(&ids)? {
        interests.entry(user_id).or_default().push(Interest {
            id: row.id,
            name: row.name,
            category: row.category,
        });
    }

    Ok(users
        .into_iter()
        .map(|u| {
            let profile_photos = photos.remove(&u.id).unwrap_or_default();
            let user_interests = interests.remove(&u.id).unwrap_or_default();
            profile(u, profile_photos, user_interests)
        })
        .collect())
}

pub(crate) fn load_profile(db: &Database, user: UserRow) -> anyhow::Result<UserProfile> {
    load_profiles(db, vec![user])?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("profile assembly lost a user"))
}

/// Profiles for `ids`, keyed by user id. Ids without a user row are absent.
pub(crate) fn load_profiles_by_ids(
    db: &Database,
    ids: &[UserId],
) -> anyhow::Result<HashMap<UserId, UserProfile>> {
    let rows = db.get_users_by_ids(ids)?;
    Ok(load_profiles(db, rows)?.into_iter().map(|p| (p.id, p)).collect())
}

fn profile(u: UserRow, profile_photos: Vec<Photo>, interests: Vec<Interest>) -> UserProfile {
    UserProfile {
        id: u.id,
        email: u.email,
        phone: u.phone,
        first_name: u.first_name,
        last_name: u.last_name,
        date_of_birth: u.date_of_birth,
        gender: u.gender,
        bio: u.bio,
        location: u.location,
        latitude: u.latitude,
        longitude: u.longitude,
        is_verified: u.is_verified,
        is_active: u.is_active,
        is_online: u.is_online,
        last_seen: u.last_seen,
        profile_photos,
        interests,
        created_at: u.created_at,
    }
}

fn photo(row: PhotoRow) -> Photo {
    Photo {
        id: row.id,
        url: row.url,
        is_primary: row.is_primary,
        order: row.sort_order,
        created_at: row.created_at,
    }
}

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".into())
}

// -- Profile --

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user = blocking(move || -> Result<UserProfile, ApiError> {
        let row = db.get_user(claims.sub)?.ok_or_else(user_not_found)?;
        Ok(load_profile(&db, row)?)
    })
    .await?;

    Ok(Json(json!({ "user": user })))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let changes = profile_changes(req)?;

    let db = state.db.clone();
    let user = blocking(move || -> Result<UserProfile, ApiError> {
        if !db.update_profile(claims.sub, &changes)? {
            return Err(user_not_found());
        }
        let row = db.get_user(claims.sub)?.ok_or_else(user_not_found)?;
        Ok(load_profile(&db, row)?)
    })
    .await?;

    Ok(Json(json!({ "message": "Profile updated successfully", "user": user })))
}

fn profile_changes(req: UpdateProfileRequest) -> Result<ProfileChanges, ApiError> {
    let name = |value: Option<String>, field: &str| -> Result<Option<String>, ApiError> {
        match value.map(|v| v.trim().to_string()) {
            Some(v) if v.is_empty() => {
                Err(ApiError::BadRequest(format!("{} cannot be empty", field)))
            }
            other => Ok(other),
        }
    };

    if req.latitude.is_some_and(|lat| !(-90.0..=90.0).contains(&lat)) {
        return Err(ApiError::BadRequest("latitude must be between -90 and 90".into()));
    }
    if req.longitude.is_some_and(|lon| !(-180.0..=180.0).contains(&lon)) {
        return Err(ApiError::BadRequest("longitude must be between -180 and 180".into()));
    }

    Ok(ProfileChanges {
        first_name: name(req.first_name, "first_name")?,
        last_name: name(req.last_name, "last_name")?,
        bio: req.bio,
        location: req.location,
        latitude: req.latitude,
        longitude: req.longitude,
        interests: req.interests,
    })
}

// -- Photos --

/// Raw image body; the Content-Type header decides the format.
pub async fn upload_photo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("No photo provided".into()));
    }
    if body.len() > state.settings.max_file_size {
        return Err(ApiError::BadRequest(format!(
            "File too large (max {} bytes)",
            state.settings.max_file_size
        )));
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let ext = image_extension(&content_type).ok_or_else(|| {
        ApiError::BadRequest("Invalid file type. Only JPEG, PNG and WebP are allowed".into())
    })?;

    let key = format!("{}_{}.{}", claims.sub, uuid::Uuid::new_v4().simple(), ext);
    let url = state.blobs.put(key.clone(), content_type, body).await?;

    let db = state.db.clone();
    let stored_key = key.clone();
    let saved = blocking(move || db.add_photo(claims.sub, &url, &stored_key)).await;
    let row = match saved {
        Ok(row) => row,
        Err(e) => {
            if let Err(cleanup) = state.blobs.delete(key).await {
                warn!("Failed to remove orphaned photo: {:#}", cleanup);
            }
            return Err(e);
        }
    };

    info!("user {} uploaded photo {}", claims.sub, row.id);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Photo uploaded successfully", "photo": photo(row) })),
    ))
}

pub async fn delete_photo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(photo_id): Path<i64>,
) -> Result<Json<StatusMessage>, ApiError> {
    let db = state.db.clone();
    let removed = blocking(move || db.delete_photo(claims.sub, photo_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Photo not found".into()))?;

    if let Err(e) = state.blobs.delete(removed.storage_key.clone()).await {
        warn!("Failed to delete stored photo {}: {:#}", removed.storage_key, e);
    }
    Ok(Json(StatusMessage::new("Photo deleted successfully")))
}

// -- Discovery --

#[derive(Debug, Default, Deserialize)]
pub struct DiscoverQuery {
    pub age_min: Option<u32>,
    pub age_max: Option<u32>,
    pub gender: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Kilometres
    pub max_distance: Option<f64>,
    /// Comma-separated interest ids
    pub interests: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub async fn discover(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<DiscoverQuery>,
) -> Result<Json<DiscoverResponse>, ApiError> {
    let (page, limit, filter) = discover_filter(query, Utc::now().date_naive())?;

    let db = state.db.clone();
    let (total, users) = blocking(move || -> Result<_, ApiError> {
        let (total, rows) = db.discover_users(claims.sub, &filter)?;
        Ok((total, load_profiles(&db, rows)?))
    })
    .await?;

    Ok(Json(DiscoverResponse {
        users,
        pagination: Pagination::new(page, limit, total),
    }))
}

/// Translate request terms into column terms. Returns `(page, limit, filter)`.
fn discover_filter(
    q: DiscoverQuery,
    today: NaiveDate,
) -> Result<(u32, u32, DiscoverFilter), ApiError> {
    let page = q.page.unwrap_or(1).max(1);
    let limit = q.limit.unwrap_or(DISCOVER_DEFAULT_LIMIT);
    if limit == 0 || limit > DISCOVER_MAX_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            DISCOVER_MAX_LIMIT
        )));
    }
    if q.age_min.into_iter().chain(q.age_max).any(|age| age > MAX_AGE) {
        return Err(ApiError::BadRequest(format!("ages must not exceed {}", MAX_AGE)));
    }
    if let (Some(min), Some(max)) = (q.age_min, q.age_max) {
        if min > max {
            return Err(ApiError::BadRequest("age_min cannot exceed age_max".into()));
        }
    }

    let gender = match q.gender.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        Some(raw) => Some(
            raw.parse::<Gender>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        ),
        None => None,
    };

    let interests = match q.interests.as_deref() {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>()
                    .map_err(|_| ApiError::BadRequest(format!("invalid interest id '{}'", s)))
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    // Someone is at least N years old if born on or before today minus N years, and
    // at most N if born after today minus N+1 years.
    let born_on_or_before = q.age_min.and_then(|min| years_before(today, min));
    let born_on_or_after = q
        .age_max
        .and_then(|max| years_before(today, max.checked_add(1)?))
        .and_then(|d| d.succ_opt());

    let near = match (q.latitude, q.longitude, q.max_distance) {
        (Some(lat), Some(lon), Some(km)) if km > 0.0 => Some((lat, lon, km)),
        _ => None,
    };

    Ok((
        page,
        limit,
        DiscoverFilter {
            born_on_or_before,
            born_on_or_after,
            gender,
            location: q.location.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
            near,
            interests,
            offset: (page - 1).saturating_mul(limit),
            limit,
        },
    ))
}

fn years_before(today: NaiveDate, years: u32) -> Option<NaiveDate> {
    today.checked_sub_months(Months::new(years.checked_mul(12)?))
}

// -- Favorites --

pub async fn list_favorites(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let favorites = blocking(move || -> Result<_, ApiError> {
        let rows = db.list_favorites(claims.sub)?;
        Ok(load_profiles(&db, rows)?)
    })
    .await?;

    Ok(Json(json!({ "favorites": favorites })))
}

pub async fn add_favorite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    if user_id == claims.sub {
        return Err(ApiError::BadRequest("You cannot favorite yourself".into()));
    }
    let db = state.db.clone();
    blocking(move || -> Result<(), ApiError> {
        db.get_user(user_id)?.ok_or_else(user_not_found)?;
        if !db.add_favorite(claims.sub, user_id)? {
            return Err(ApiError::Conflict("User already in favorites".into()));
        }
        Ok(())
    })
    .await?;

    Ok((StatusCode::CREATED, Json(StatusMessage::new("Added to favorites successfully"))))
}

pub async fn remove_favorite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<UserId>,
) -> Result<Json<StatusMessage>, ApiError> {
    let db = state.db.clone();
    blocking(move || db.remove_favorite(claims.sub, user_id)).await?;
    Ok(Json(StatusMessage::new("Removed from favorites successfully")))
}

// -- Blocking & reports --

pub async fn block_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    if user_id == claims.sub {
        return Err(ApiError::BadRequest("You cannot block yourself".into()));
    }
    let db = state.db.clone();
    blocking(move || -> Result<(), ApiError> {
        db.get_user(user_id)?.ok_or_else(user_not_found)?;
        if !db.block_user(claims.sub, user_id)? {
            return Err(ApiError::Conflict("User already blocked".into()));
        }
        Ok(())
    })
    .await?;

    info!("user {} blocked user {}", claims.sub, user_id);
    Ok((StatusCode::CREATED, Json(StatusMessage::new("User blocked successfully"))))
}

pub async fn unblock_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<UserId>,
) -> Result<Json<StatusMessage>, ApiError> {
    let db = state.db.clone();
    blocking(move || db.unblock_user(claims.sub, user_id)).await?;
    Ok(Json(StatusMessage::new("User unblocked successfully")))
}

pub async fn report_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<ReportUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = req.reason.trim().to_string();
    if reason.is_empty() {
        return Err(ApiError::BadRequest("reason is required".into()));
    }
    if req.reported_id == claims.sub {
        return Err(ApiError::BadRequest("You cannot report yourself".into()));
    }

    let db = state.db.clone();
    blocking(move || -> Result<(), ApiError> {
        db.get_user(req.reported_id)?.ok_or_else(user_not_found)?;
        let description = req.description.as_deref().map(str::trim).filter(|d| !d.is_empty());
        if !db.create_report(claims.sub, req.reported_id, &reason, description)? {
            return Err(ApiError::Conflict("User already reported".into()));
        }
        Ok(())
    })
    .await?;

    info!("user {} reported user {}", claims.sub, req.reported_id);
    Ok((StatusCode::CREATED, Json(StatusMessage::new("User reported successfully"))))
}
