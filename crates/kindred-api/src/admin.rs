//! Moderation and analytics endpoints. Every route here sits behind
//! [`crate::middleware::require_admin`].

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use kindred_db::models::{ActivityRow, ReportRow, UserBriefRow};
use kindred_db::{AccountState, AdminUserFilter};
use kindred_types::api::{
    Activity, AdminUserDetail, Analytics, AnalyticsResponse, Claims, DailyCount, GenderCount,
    Report, ReportListResponse, StatusMessage, UpdateReportStatusRequest, UpdateUserStatusRequest,
    UserBrief, UserListResponse,
};
use kindred_types::models::{ReportStatus, UserId, UserStatus};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::users::{load_profile, load_profiles};
use crate::{AppState, blocking};

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: i64 = 100;
const RECENT_ACTIVITY: u32 = 10;
const REGISTRATION_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct AdminListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub search: Option<String>,
}

/// Out-of-range values fall back to defaults instead of failing the request.
fn paging(page: Option<i64>, limit: Option<i64>) -> (u32, u32) {
    let page = page.unwrap_or(1).clamp(1, i64::from(u32::MAX)) as u32;
    let limit = match limit {
        Some(l) if (1..=MAX_LIMIT).contains(&l) => l as u32,
        _ => DEFAULT_LIMIT,
    };
    (page, limit)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn brief(row: UserBriefRow) -> UserBrief {
    UserBrief {
        id: row.id,
        email: row.email,
        first_name: row.first_name,
        last_name: row.last_name,
    }
}

fn report(row: ReportRow) -> Report {
    Report {
        id: row.id,
        reason: row.reason,
        description: row.description,
        status: row.status,
        reporter: brief(row.reporter),
        reported: brief(row.reported),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn activity(row: ActivityRow) -> Activity {
    Activity {
        id: row.id,
        user_id: row.user_id,
        action: row.action,
        ip_address: row.ip_address,
        user_agent: row.user_agent,
        created_at: row.created_at,
    }
}

/// First hop of X-Forwarded-For, else X-Real-IP.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    forwarded
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()).map(str::trim))
        .map(str::to_string)
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    let (page, limit) = paging(query.page, query.limit);
    let account_state = match non_empty(query.status) {
        Some(raw) => Some(
            raw.parse::<AccountState>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        ),
        None => None,
    };
    let filter = AdminUserFilter {
        state: account_state,
        search: non_empty(query.search),
        offset: (page - 1).saturating_mul(limit),
        limit,
    };

    let db = state.db.clone();
    let (total, users) = blocking(move || -> Result<_, ApiError> {
        let (total, rows) = db.list_users(&filter)?;
        Ok((total, load_profiles(&db, rows)?))
    })
    .await?;

    Ok(Json(UserListResponse {
        users,
        total,
        page,
        limit,
    }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<AdminUserDetail>, ApiError> {
    let db = state.db.clone();
    let detail = blocking(move || -> Result<AdminUserDetail, ApiError> {
        let row = db
            .get_user(user_id)?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
        Ok(AdminUserDetail {
            user: load_profile(&db, row)?,
            activities: db
                .recent_activities(user_id, RECENT_ACTIVITY)?
                .into_iter()
                .map(activity)
                .collect(),
            reports: db.reports_against(user_id)?.into_iter().map(report).collect(),
        })
    })
    .await?;

    Ok(Json(detail))
}

/// `suspended` and `inactive` both deactivate the account. The change is written to
/// the target user's activity log.
pub async fn update_user_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<UserId>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<UpdateUserStatusRequest>,
) -> Result<Json<StatusMessage>, ApiError> {
    let ip = client_ip(&headers);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let status = req.status;

    let db = state.db.clone();
    blocking(move || -> Result<(), ApiError> {
        if !db.set_active(user_id, status == UserStatus::Active)? {
            return Err(ApiError::NotFound("User not found".into()));
        }
        db.log_activity(
            user_id,
            &format!("status_changed_to_{}", status),
            ip.as_deref(),
            user_agent.as_deref(),
        )?;
        Ok(())
    })
    .await?;

    info!("admin {} set user {} to {}", claims.sub, user_id, status);
    Ok(Json(StatusMessage::new("User status updated successfully")))
}

pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<ReportListResponse>, ApiError> {
    let (page, limit) = paging(query.page, query.limit);
    let status = match non_empty(query.status) {
        Some(raw) => Some(
            raw.parse::<ReportStatus>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        ),
        None => None,
    };

    let db = state.db.clone();
    let (total, rows) =
        blocking(move || db.list_reports(status, (page - 1).saturating_mul(limit), limit)).await?;

    Ok(Json(ReportListResponse {
        reports: rows.into_iter().map(report).collect(),
        total,
        page,
        limit,
    }))
}

pub async fn update_report_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(report_id): Path<i64>,
    ApiJson(req): ApiJson<UpdateReportStatusRequest>,
) -> Result<Json<StatusMessage>, ApiError> {
    let db = state.db.clone();
    let status = req.status;
    if !blocking(move || db.update_report_status(report_id, status)).await? {
        return Err(ApiError::NotFound("Report not found".into()));
    }

    info!("admin {} set report {} to {}", claims.sub, report_id, status);
    Ok(Json(StatusMessage::new("Report status updated successfully")))
}

pub async fn analytics(State(state): State<AppState>) -> Result<Json<AnalyticsResponse>, ApiError> {
    let db = state.db.clone();
    let (counts, daily, genders) = blocking(move || -> anyhow::Result<_> {
        Ok((
            db.analytics_counts()?,
            db.daily_registrations(REGISTRATION_WINDOW_DAYS)?,
            db.gender_distribution()?,
        ))
    })
    .await?;
    let live = state.hub.stats().await;

    Ok(Json(AnalyticsResponse {
        analytics: Analytics {
            total_users: counts.total_users,
            active_users: counts.active_users,
            new_users_today: counts.new_users_today,
            total_matches: counts.total_matches,
            matches_today: counts.matches_today,
            total_messages: counts.total_messages,
            messages_today: counts.messages_today,
            pending_reports: counts.pending_reports,
            live_sessions: live.sessions,
            date: Utc::now(),
        },
        daily_registrations: daily
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect(),
        gender_distribution: genders
            .into_iter()
            .map(|(gender, count)| GenderCount { gender, count })
            .collect(),
    }))
}
