use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{Connection, Row};

use kindred_types::models::{Gender, UserId};

use super::{Filter, OptionalExt, placeholders};
use crate::Database;
use crate::models::{InterestRow, NewUser, PhotoRow, USER_COLUMNS, UserRow, parse_timestamp};

const PHOTO_COLUMNS: &str = "id, user_id, url, storage_key, is_primary, sort_order, created_at";

/// Optional profile fields; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Replaces the interest set; unknown interest ids are skipped.
    pub interests: Option<Vec<i64>>,
}

/// Discovery filters, already translated from request terms (ages, km) into column
/// terms (birth dates, degrees).
#[derive(Debug, Clone, Default)]
pub struct DiscoverFilter {
    pub born_on_or_before: Option<NaiveDate>,
    pub born_on_or_after: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub location: Option<String>,
    /// (latitude, longitude, max distance in km)
    pub near: Option<(f64, f64, f64)>,
    pub interests: Vec<i64>,
    pub offset: u32,
    pub limit: u32,
}

/// Kilometres per degree used by the flat distance approximation.
const KM_PER_DEGREE: f64 = 111.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    Valid,
    Expired,
    Invalid,
}

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser) -> Result<UserId> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (email, phone, password, first_name, last_name,
                                    date_of_birth, gender, is_verified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    user.email,
                    user.phone,
                    user.password_hash,
                    user.first_name,
                    user.last_name,
                    user.date_of_birth.format("%Y-%m-%d").to_string(),
                    user.gender.as_str(),
                    user.is_verified,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", &[Value::Integer(id)]))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", &[Value::Text(email.to_string())]))
    }

    pub fn phone_taken(&self, phone: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE phone = ?1",
                [phone],
                |r| r.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Batch-fetch users, in no particular order.
    pub fn get_users_by_ids(&self, ids: &[UserId]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE id IN ({})",
                USER_COLUMNS,
                placeholders(1, ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), UserRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn mark_verified(&self, id: UserId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_verified = 1, updated_at = datetime('now') WHERE id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    /// Record presence and bump `last_seen`.
    pub fn set_online(&self, id: UserId, online: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?2, last_seen = datetime('now') WHERE id = ?1",
                rusqlite::params![id, online],
            )?;
            Ok(())
        })
    }

    /// Returns false if the user does not exist.
    pub fn set_active(&self, id: UserId, active: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET is_active = ?2, updated_at = datetime('now') WHERE id = ?1",
                rusqlite::params![id, active],
            )?;
            Ok(n > 0)
        })
    }

    /// Apply profile changes and (optionally) replace interests in one transaction.
    /// Returns false if the user does not exist.
    pub fn update_profile(&self, id: UserId, changes: &ProfileChanges) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let n = tx.execute(
                "UPDATE users SET
                    first_name = COALESCE(?2, first_name),
                    last_name  = COALESCE(?3, last_name),
                    bio        = COALESCE(?4, bio),
                    location   = COALESCE(?5, location),
                    latitude   = COALESCE(?6, latitude),
                    longitude  = COALESCE(?7, longitude),
                    updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    changes.first_name,
                    changes.last_name,
                    changes.bio,
                    changes.location,
                    changes.latitude,
                    changes.longitude,
                ],
            )?;
            if n == 0 {
                return Ok(false);
            }

            if let Some(interests) = &changes.interests {
                tx.execute("DELETE FROM user_interests WHERE user_id = ?1", [id])?;
                for interest_id in interests {
                    tx.execute(
                        "INSERT OR IGNORE INTO user_interests (user_id, interest_id)
                         SELECT ?1, id FROM interests WHERE id = ?2",
                        rusqlite::params![id, interest_id],
                    )?;
                }
            }

            tx.commit()?;
            Ok(true)
        })
    }

    // -- Photos --

    /// Batch-fetch photos for a set of users, ordered by user then display order.
    pub fn photos_for_users(&self, user_ids: &[UserId]) -> Result<Vec<PhotoRow>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM profile_photos WHERE user_id IN ({})
                 ORDER BY user_id, sort_order, id",
                PHOTO_COLUMNS,
                placeholders(1, user_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(user_ids.iter()), photo_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Store a photo record. The first photo of a user becomes primary.
    pub fn add_photo(&self, user_id: UserId, url: &str, storage_key: &str) -> Result<PhotoRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM profile_photos WHERE user_id = ?1",
                [user_id],
                |r| r.get(0),
            )?;
            tx.execute(
                "INSERT INTO profile_photos (user_id, url, storage_key, is_primary, sort_order)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![user_id, url, storage_key, count == 0, count],
            )?;
            let id = tx.last_insert_rowid();
            let row = tx.query_row(
                &format!("SELECT {} FROM profile_photos WHERE id = ?1", PHOTO_COLUMNS),
                [id],
                photo_from_row,
            )?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Delete one of the user's photos. If it was primary, the next photo in display
    /// order is promoted. Returns the deleted row, or `None` if it wasn't theirs.
    pub fn delete_photo(&self, user_id: UserId, photo_id: i64) -> Result<Option<PhotoRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let photo = tx
                .query_row(
                    &format!(
                        "SELECT {} FROM profile_photos WHERE id = ?1 AND user_id = ?2",
                        PHOTO_COLUMNS
                    ),
                    [photo_id, user_id],
                    photo_from_row,
                )
                .optional()?;

            let Some(photo) = photo else {
                return Ok(None);
            };

            tx.execute("DELETE FROM profile_photos WHERE id = ?1", [photo_id])?;
            if photo.is_primary {
                tx.execute(
                    "UPDATE profile_photos SET is_primary = 1 WHERE id = (
                        SELECT id FROM profile_photos WHERE user_id = ?1
                        ORDER BY sort_order, id LIMIT 1
                     )",
                    [user_id],
                )?;
            }
            tx.commit()?;
            Ok(Some(photo))
        })
    }

    // -- Interests --

    /// Batch-fetch `(user_id, interest)` pairs for a set of users.
    pub fn interests_for_users(&self, user_ids: &[UserId]) -> Result<Vec<(UserId, InterestRow)>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT ui.user_id, i.id, i.name, i.category
                 FROM user_interests ui
                 JOIN interests i ON i.id = ui.interest_id
                 WHERE ui.user_id IN ({})
                 ORDER BY i.name",
                placeholders(1, user_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(user_ids.iter()), |row| {
                    Ok((
                        row.get(0)?,
                        InterestRow {
                            id: row.get(1)?,
                            name: row.get(2)?,
                            category: row.get(3)?,
                        },
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Discovery --

    /// Candidates for `viewer`: active, verified, not themselves, not blocked by them,
    /// and not already liked or disliked by them. Returns (total matching, page).
    pub fn discover_users(
        &self,
        viewer: UserId,
        filter: &DiscoverFilter,
    ) -> Result<(i64, Vec<UserRow>)> {
        let mut f = Filter::default();
        f.push("id != ? AND is_active = 1 AND is_verified = 1", [Value::Integer(viewer)]);
        f.push(
            "id NOT IN (SELECT blocked_id FROM blocked_users WHERE blocker_id = ?)",
            [Value::Integer(viewer)],
        );
        f.push(
            "id NOT IN (SELECT liked_id FROM likes WHERE liker_id = ?)",
            [Value::Integer(viewer)],
        );
        f.push(
            "id NOT IN (SELECT disliked_id FROM dislikes WHERE disliker_id = ?)",
            [Value::Integer(viewer)],
        );

        if let Some(date) = filter.born_on_or_before {
            f.push("date_of_birth <= ?", [Value::Text(date.format("%Y-%m-%d").to_string())]);
        }
        if let Some(date) = filter.born_on_or_after {
            f.push("date_of_birth >= ?", [Value::Text(date.format("%Y-%m-%d").to_string())]);
        }
        if let Some(gender) = filter.gender {
            f.push("gender = ?", [Value::Text(gender.as_str().to_string())]);
        }
        if let Some(location) = &filter.location {
            f.push("location LIKE ?", [Value::Text(format!("%{}%", location))]);
        }
        if let Some((lat, lon, max_km)) = filter.near {
            let max_deg = max_km / KM_PER_DEGREE;
            f.push(
                "latitude IS NOT NULL AND longitude IS NOT NULL AND \
                 ((latitude - ?) * (latitude - ?) + (longitude - ?) * (longitude - ?)) <= ?",
                [
                    Value::Real(lat),
                    Value::Real(lat),
                    Value::Real(lon),
                    Value::Real(lon),
                    Value::Real(max_deg * max_deg),
                ],
            );
        }
        if !filter.interests.is_empty() {
            let marks = vec!["?"; filter.interests.len()].join(", ");
            f.push(
                &format!(
                    "EXISTS (SELECT 1 FROM user_interests ui
                             WHERE ui.user_id = users.id AND ui.interest_id IN ({}))",
                    marks
                ),
                filter.interests.iter().map(|id| Value::Integer(*id)),
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

    // -- OTP --

    pub fn create_otp(
        &self,
        email: &str,
        phone: Option<&str>,
        code: &str,
        ttl_minutes: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO otps (email, phone, code, expires_at)
                 VALUES (?1, ?2, ?3, datetime('now', ?4))",
                rusqlite::params![email, phone, code, format!("{:+} minutes", ttl_minutes)],
            )?;
            Ok(())
        })
    }

    /// Check an unused code for `email`; a valid code is consumed.
    pub fn check_otp(&self, email: &str, code: &str) -> Result<OtpCheck> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let found: Option<(i64, bool)> = tx
                .query_row(
                    "SELECT id, expires_at > datetime('now') FROM otps
                     WHERE email = ?1 AND code = ?2 AND is_used = 0
                     ORDER BY id DESC LIMIT 1",
                    [email, code],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

            let outcome = match found {
                None => OtpCheck::Invalid,
                Some((_, false)) => OtpCheck::Expired,
                Some((id, true)) => {
                    tx.execute("UPDATE otps SET is_used = 1 WHERE id = ?1", [id])?;
                    OtpCheck::Valid
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
    }
}

fn query_user(conn: &Connection, predicate: &str, params: &[Value]) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, predicate);
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt
        .query_row(rusqlite::params_from_iter(params.iter()), UserRow::from_row)
        .optional()?;
    Ok(row)
}

fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<PhotoRow> {
    Ok(PhotoRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        url: row.get(2)?,
        storage_key: row.get(3)?,
        is_primary: row.get(4)?,
        sort_order: row.get(5)?,
        created_at: parse_timestamp(&row.get::<_, String>(6)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, user};

    #[test]
    fn create_and_fetch_user() {
        let db = db();
        let id = user(&db, "abebe@example.com");

        let fetched = db.get_user(id).unwrap().unwrap();
        assert_eq!(fetched.email, "abebe@example.com");
        assert_eq!(fetched.gender, Gender::Female);
        assert!(fetched.is_active);

        let by_email = db.get_user_by_email("abebe@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, id);
        assert!(db.get_user(id + 100).unwrap().is_none());
    }

    #[test]
    fn user_ids_are_not_reused() {
        let db = db();
        let first = user(&db, "one@example.com");
        db.with_conn(|c| {
            c.execute("DELETE FROM users WHERE id = ?1", [first])?;
            Ok(())
        })
        .unwrap();
        let second = user(&db, "two@example.com");
        assert!(second > first);
    }

    #[test]
    fn first_photo_is_primary_and_primary_moves_on_delete() {
        let db = db();
        let id = user(&db, "photos@example.com");

        let a = db.add_photo(id, "http://x/a.jpg", "a.jpg").unwrap();
        let b = db.add_photo(id, "http://x/b.jpg", "b.jpg").unwrap();
        assert!(a.is_primary);
        assert!(!b.is_primary);
        assert_eq!(b.sort_order, 1);

        let deleted = db.delete_photo(id, a.id).unwrap().unwrap();
        assert_eq!(deleted.storage_key, "a.jpg");

        let remaining = db.photos_for_users(&[id]).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_primary);
    }

    #[test]
    fn deleting_someone_elses_photo_is_none() {
        let db = db();
        let owner = user(&db, "owner@example.com");
        let other = user(&db, "other@example.com");
        let photo = db.add_photo(owner, "http://x/a.jpg", "a.jpg").unwrap();
        assert!(db.delete_photo(other, photo.id).unwrap().is_none());
    }

    #[test]
    fn update_profile_keeps_unset_fields_and_replaces_interests() {
        let db = db();
        let id = user(&db, "profile@example.com");

        let changes = ProfileChanges {
            bio: Some("Coffee first".into()),
            interests: Some(vec![1, 2, 9999]),
            ..Default::default()
        };
        assert!(db.update_profile(id, &changes).unwrap());

        let row = db.get_user(id).unwrap().unwrap();
        assert_eq!(row.bio.as_deref(), Some("Coffee first"));
        assert_eq!(row.first_name, "Test");

        let interests = db.interests_for_users(&[id]).unwrap();
        assert_eq!(interests.len(), 2);

        assert!(!db.update_profile(id + 50, &changes).unwrap());
    }

    #[test]
    fn discover_excludes_self_liked_blocked_and_unverified() {
        let db = db();
        let viewer = user(&db, "viewer@example.com");
        let liked = user(&db, "liked@example.com");
        let blocked = user(&db, "blocked@example.com");
        let visible = user(&db, "visible@example.com");
        let unverified = db
            .create_user(&NewUser {
                is_verified: false,
                ..crate::test_support::new_user("unverified@example.com")
            })
            .unwrap();

        db.record_like(viewer, liked).unwrap();
        db.block_user(viewer, blocked).unwrap();

        let filter = DiscoverFilter {
            limit: 20,
            ..Default::default()
        };
        let (total, rows) = db.discover_users(viewer, &filter).unwrap();
        let ids: Vec<UserId> = rows.iter().map(|r| r.id).collect();
        assert_eq!(total, 1);
        assert_eq!(ids, vec![visible]);
        assert!(!ids.contains(&unverified));
    }

    #[test]
    fn discover_distance_filter_uses_flat_approximation() {
        let db = db();
        let viewer = user(&db, "viewer@example.com");
        let near = user(&db, "near@example.com");
        let far = user(&db, "far@example.com");
        let set = |id, lat, lon| {
            db.update_profile(
                id,
                &ProfileChanges {
                    latitude: Some(lat),
                    longitude: Some(lon),
                    ..Default::default()
                },
            )
            .unwrap();
        };
        // Addis Ababa and Bahir Dar are roughly 4 degrees apart
        set(near, 9.03, 38.76);
        set(far, 11.59, 37.39);

        let filter = DiscoverFilter {
            near: Some((9.0, 38.7, 50.0)),
            limit: 20,
            ..Default::default()
        };
        let (_, rows) = db.discover_users(viewer, &filter).unwrap();
        let ids: Vec<UserId> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![near]);
        assert!(!ids.contains(&far));
    }

    #[test]
    fn otp_is_single_use() {
        let db = db();
        db.create_otp("otp@example.com", None, "123456", 5).unwrap();

        assert_eq!(db.check_otp("otp@example.com", "000000").unwrap(), OtpCheck::Invalid);
        assert_eq!(db.check_otp("otp@example.com", "123456").unwrap(), OtpCheck::Valid);
        assert_eq!(db.check_otp("otp@example.com", "123456").unwrap(), OtpCheck::Invalid);
    }

    #[test]
    fn expired_otp_is_reported() {
        let db = db();
        db.create_otp("late@example.com", None, "654321", -1).unwrap();
        assert_eq!(db.check_otp("late@example.com", "654321").unwrap(), OtpCheck::Expired);
    }
}
