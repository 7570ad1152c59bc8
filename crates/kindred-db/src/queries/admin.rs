use anyhow::Result;
use rusqlite::Row;
use rusqlite::types::Value;

use kindred_types::models::{AdminRole, ReportStatus, UserId};

use super::{Filter, OptionalExt};
use crate::Database;
use crate::models::{
    ActivityRow, AdminRow, ReportRow, USER_COLUMNS, UserBriefRow, UserRow, parse_column,
    parse_timestamp,
};

/// Account state filter for the admin user list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Active,
    Inactive,
    Verified,
    Unverified,
}

impl std::str::FromStr for AccountState {
    type Err = kindred_types::models::UnknownVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "verified" => Ok(Self::Verified),
            "unverified" => Ok(Self::Unverified),
            other => Err(kindred_types::models::UnknownVariant {
                kind: "account state",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdminUserFilter {
    pub state: Option<AccountState>,
    /// Matched against email, first and last name.
    pub search: Option<String>,
    pub offset: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyticsCounts {
    pub total_users: i64,
    pub active_users: i64,
    pub new_users_today: i64,
    pub total_matches: i64,
    pub matches_today: i64,
    pub total_messages: i64,
    pub messages_today: i64,
    pub pending_reports: i64,
}

const REPORT_SELECT: &str = "SELECT r.id, r.reason, r.description, r.status,
        a.id, a.email, a.first_name, a.last_name,
        b.id, b.email, b.first_name, b.last_name,
        r.created_at, r.updated_at
     FROM reports r
     JOIN users a ON a.id = r.reporter_id
     JOIN users b ON b.id = r.reported_id";

impl Database {
    // -- Admins --

    /// The admin record for `user_id`, if it exists and is active.
    pub fn admin_role(&self, user_id: UserId) -> Result<Option<AdminRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, role, is_active FROM admins WHERE user_id = ?1 AND is_active = 1",
                [user_id],
                |row| {
                    Ok(AdminRow {
                        user_id: row.get(0)?,
                        role: parse_column(row, 1)?,
                        is_active: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Grant (or re-grant) an admin role.
    pub fn grant_admin(&self, user_id: UserId, role: AdminRole) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO admins (user_id, role) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET role = excluded.role, is_active = 1",
                rusqlite::params![user_id, role.as_str()],
            )?;
            Ok(())
        })
    }

    // -- Users --

    /// Filtered user list, newest first. Returns (total matching, page).
    pub fn list_users(&self, filter: &AdminUserFilter) -> Result<(i64, Vec<UserRow>)> {
        let mut f = Filter::default();
        match filter.state {
            Some(AccountState::Active) => f.push("is_active = 1", std::iter::empty::<Value>()),
            Some(AccountState::Inactive) => f.push("is_active = 0", std::iter::empty::<Value>()),
            Some(AccountState::Verified) => f.push("is_verified = 1", std::iter::empty::<Value>()),
            Some(AccountState::Unverified) => {
                f.push("is_verified = 0", std::iter::empty::<Value>())
            }
            None => {}
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search);
            f.push(
                "(email LIKE ? OR first_name LIKE ? OR last_name LIKE ?)",
                [
                    Value::Text(pattern.clone()),
                    Value::Text(pattern.clone()),
                    Value::Text(pattern),
                ],
            );
        }

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM users {}", f.where_sql()),
                rusqlite::params_from_iter(f.params()),
                |r| r.get(0),
            )?;

            let next = f.next_index();
            let sql = format!(
                "SELECT {} FROM users {} ORDER BY id DESC LIMIT ?{} OFFSET ?{}",
                USER_COLUMNS,
                f.where_sql(),
                next,
                next + 1
            );
            let params = f.params_with([
                Value::Integer(i64::from(filter.limit)),
                Value::Integer(i64::from(filter.offset)),
            ]);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), UserRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((total, rows))
        })
    }

    // -- Activity log --

    pub fn log_activity(
        &self,
        user_id: UserId,
        action: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_activities (user_id, action, ip_address, user_agent)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, action, ip_address, user_agent],
            )?;
            Ok(())
        })
    }

    pub fn recent_activities(&self, user_id: UserId, limit: u32) -> Result<Vec<ActivityRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, action, ip_address, user_agent, created_at
                 FROM user_activities WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], |row| {
                    Ok(ActivityRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        action: row.get(2)?,
                        ip_address: row.get(3)?,
                        user_agent: row.get(4)?,
                        created_at: parse_timestamp(&row.get::<_, String>(5)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reports --

    pub fn list_reports(
        &self,
        status: Option<ReportStatus>,
        offset: u32,
        limit: u32,
    ) -> Result<(i64, Vec<ReportRow>)> {
        let mut f = Filter::default();
        if let Some(status) = status {
            f.push("r.status = ?", [Value::Text(status.as_str().to_string())]);
        }

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM reports r {}", f.where_sql()),
                rusqlite::params_from_iter(f.params()),
                |r| r.get(0),
            )?;

            let next = f.next_index();
            let sql = format!(
                "{} {} ORDER BY r.id DESC LIMIT ?{} OFFSET ?{}",
                REPORT_SELECT,
                f.where_sql(),
                next,
                next + 1
            );
            let params = f.params_with([
                Value::Integer(i64::from(limit)),
                Value::Integer(i64::from(offset)),
            ]);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), report_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((total, rows))
        })
    }

    /// Every report filed against `user_id`, newest first.
    pub fn reports_against(&self, user_id: UserId) -> Result<Vec<ReportRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE r.reported_id = ?1 ORDER BY r.id DESC",
                REPORT_SELECT
            ))?;
            let rows = stmt
                .query_map([user_id], report_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false if the report does not exist.
    pub fn update_report_status(&self, report_id: i64, status: ReportStatus) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE reports SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
                rusqlite::params![report_id, status.as_str()],
            )?;
            Ok(n > 0)
        })
    }

    // -- Analytics --

    /// Headline counts. "Active" users are those seen in the last seven days; match
    /// counts only include active matches.
    pub fn analytics_counts(&self) -> Result<AnalyticsCounts> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM users),
                    (SELECT COUNT(*) FROM users WHERE last_seen > datetime('now', '-7 days')),
                    (SELECT COUNT(*) FROM users WHERE date(created_at) = date('now')),
                    (SELECT COUNT(*) FROM matches WHERE is_active = 1),
                    (SELECT COUNT(*) FROM matches
                      WHERE is_active = 1 AND date(created_at) = date('now')),
                    (SELECT COUNT(*) FROM messages),
                    (SELECT COUNT(*) FROM messages WHERE date(created_at) = date('now')),
                    (SELECT COUNT(*) FROM reports WHERE status = 'pending')",
                [],
                |row| {
                    Ok(AnalyticsCounts {
                        total_users: row.get(0)?,
                        active_users: row.get(1)?,
                        new_users_today: row.get(2)?,
                        total_matches: row.get(3)?,
                        matches_today: row.get(4)?,
                        total_messages: row.get(5)?,
                        messages_today: row.get(6)?,
                        pending_reports: row.get(7)?,
                    })
                },
            )?;
            Ok(counts)
        })
    }

    /// Registrations per day over the last `days` days, oldest first. Days without
    /// registrations are omitted.
    pub fn daily_registrations(&self, days: u32) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date(created_at) AS day, COUNT(*) FROM users
                 WHERE created_at >= datetime('now', ?1)
                 GROUP BY day ORDER BY day",
            )?;
            let rows = stmt
                .query_map([format!("-{} days", days)], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn gender_distribution(&self) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT gender, COUNT(*) FROM users GROUP BY gender ORDER BY gender")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<ReportRow> {
    Ok(ReportRow {
        id: row.get(0)?,
        reason: row.get(1)?,
        description: row.get(2)?,
        status: parse_column(row, 3)?,
        reporter: UserBriefRow {
            id: row.get(4)?,
            email: row.get(5)?,
            first_name: row.get(6)?,
            last_name: row.get(7)?,
        },
        reported: UserBriefRow {
            id: row.get(8)?,
            email: row.get(9)?,
            first_name: row.get(10)?,
            last_name: row.get(11)?,
        },
        created_at: parse_timestamp(&row.get::<_, String>(12)?),
        updated_at: parse_timestamp(&row.get::<_, String>(13)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::test_support::{db, new_user, user};

    #[test]
    fn admin_roles_can_be_granted_and_revoked() {
        let db = db();
        let a = user(&db, "admin@example.com");
        assert!(db.admin_role(a).unwrap().is_none());

        db.grant_admin(a, AdminRole::Moderator).unwrap();
        assert_eq!(db.admin_role(a).unwrap().unwrap().role, AdminRole::Moderator);

        db.grant_admin(a, AdminRole::SuperAdmin).unwrap();
        assert_eq!(db.admin_role(a).unwrap().unwrap().role, AdminRole::SuperAdmin);
    }

    #[test]
    fn list_users_filters_by_state_and_search() {
        let db = db();
        user(&db, "almaz@example.com");
        let hidden = user(&db, "bekele@example.com");
        db.create_user(&NewUser {
            is_verified: false,
            ..new_user("chaltu@example.com")
        })
        .unwrap();
        db.set_active(hidden, false).unwrap();

        let all = AdminUserFilter {
            limit: 10,
            ..Default::default()
        };
        assert_eq!(db.list_users(&all).unwrap().0, 3);

        let inactive = AdminUserFilter {
            state: Some(AccountState::Inactive),
            ..all.clone()
        };
        let (total, rows) = db.list_users(&inactive).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, hidden);

        let unverified = AdminUserFilter {
            state: Some(AccountState::Unverified),
            ..all.clone()
        };
        assert_eq!(db.list_users(&unverified).unwrap().0, 1);

        let search = AdminUserFilter {
            search: Some("alma".into()),
            ..all
        };
        let (total, rows) = db.list_users(&search).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].email, "almaz@example.com");
    }

    #[test]
    fn reports_carry_both_parties_and_status_updates() {
        let db = db();
        let a = user(&db, "a@example.com");
        let b = user(&db, "b@example.com");
        db.create_report(a, b, "fake profile", Some("stock photos")).unwrap();

        let (total, rows) = db.list_reports(Some(ReportStatus::Pending), 0, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].reporter.id, a);
        assert_eq!(rows[0].reported.id, b);

        assert!(db.update_report_status(rows[0].id, ReportStatus::Resolved).unwrap());
        assert!(!db.update_report_status(rows[0].id + 1, ReportStatus::Resolved).unwrap());
        assert_eq!(db.list_reports(Some(ReportStatus::Pending), 0, 10).unwrap().0, 0);
        assert_eq!(db.reports_against(b).unwrap()[0].status, ReportStatus::Resolved);
    }

    #[test]
    fn activities_are_listed_newest_first() {
        let db = db();
        let a = user(&db, "a@example.com");
        db.log_activity(a, "status_changed_to_inactive", Some("10.0.0.1"), None).unwrap();
        db.log_activity(a, "status_changed_to_active", None, Some("curl/8")).unwrap();

        let rows = db.recent_activities(a, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "status_changed_to_active");
        assert_eq!(rows[1].ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn analytics_count_todays_activity() {
        let db = db();
        let a = user(&db, "a@example.com");
        let b = user(&db, "b@example.com");
        db.record_like(a, b).unwrap();
        db.record_like(b, a).unwrap();

        let counts = db.analytics_counts().unwrap();
        assert_eq!(counts.total_users, 2);
        assert_eq!(counts.new_users_today, 2);
        assert_eq!(counts.matches_today, 1);
        assert_eq!(counts.pending_reports, 0);

        let daily = db.daily_registrations(30).unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].1, 2);

        assert_eq!(db.gender_distribution().unwrap(), vec![("female".to_string(), 2)]);
    }
}
