use anyhow::Result;

use kindred_types::models::UserId;

use crate::Database;
use crate::models::{USER_COLUMNS, UserRow};

impl Database {
    // -- Favorites --

    /// Returns false if `favorite_id` was already a favorite.
    pub fn add_favorite(&self, user_id: UserId, favorite_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO favorites (user_id, favorite_id) VALUES (?1, ?2)",
                [user_id, favorite_id],
            )?;
            Ok(n > 0)
        })
    }

    /// Returns false if there was nothing to remove.
    pub fn remove_favorite(&self, user_id: UserId, favorite_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM favorites WHERE user_id = ?1 AND favorite_id = ?2",
                [user_id, favorite_id],
            )?;
            Ok(n > 0)
        })
    }

    /// Active users in `user_id`'s favorites, most recently added first.
    pub fn list_favorites(&self, user_id: UserId) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users
                 WHERE is_active = 1
                   AND id IN (SELECT favorite_id FROM favorites WHERE user_id = ?1)
                 ORDER BY (SELECT f.id FROM favorites f
                           WHERE f.user_id = ?1 AND f.favorite_id = users.id) DESC",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], UserRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Blocking --

    /// Block `blocked_id` and drop them from the blocker's favorites. Returns false if
    /// they were already blocked.
    pub fn block_user(&self, blocker_id: UserId, blocked_id: UserId) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let n = tx.execute(
                "INSERT OR IGNORE INTO blocked_users (blocker_id, blocked_id) VALUES (?1, ?2)",
                [blocker_id, blocked_id],
            )?;
            tx.execute(
                "DELETE FROM favorites WHERE user_id = ?1 AND favorite_id = ?2",
                [blocker_id, blocked_id],
            )?;
            tx.commit()?;
            Ok(n > 0)
        })
    }

    pub fn unblock_user(&self, blocker_id: UserId, blocked_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM blocked_users WHERE blocker_id = ?1 AND blocked_id = ?2",
                [blocker_id, blocked_id],
            )?;
            Ok(n > 0)
        })
    }

    /// Whether `blocker_id` has blocked `blocked_id`. One direction only.
    pub fn is_blocked(&self, blocker_id: UserId, blocked_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM blocked_users WHERE blocker_id = ?1 AND blocked_id = ?2",
                [blocker_id, blocked_id],
                |r| r.get(0),
            )?;
            Ok(n > 0)
        })
    }

    // -- Reports --

    /// File a report. Returns false if this reporter already reported this user.
    pub fn create_report(
        &self,
        reporter_id: UserId,
        reported_id: UserId,
        reason: &str,
        description: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO reports (reporter_id, reported_id, reason, description)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![reporter_id, reported_id, reason, description],
            )?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{db, user};

    #[test]
    fn favorites_are_unique_per_pair() {
        let db = db();
        let a = user(&db, "a@example.com");
        let b = user(&db, "b@example.com");

        assert!(db.add_favorite(a, b).unwrap());
        assert!(!db.add_favorite(a, b).unwrap());

        let favs = db.list_favorites(a).unwrap();
        assert_eq!(favs.len(), 1);
        assert_eq!(favs[0].id, b);

        assert!(db.remove_favorite(a, b).unwrap());
        assert!(!db.remove_favorite(a, b).unwrap());
        assert!(db.list_favorites(a).unwrap().is_empty());
    }

    #[test]
    fn blocking_removes_favorite_and_is_one_directional() {
        let db = db();
        let a = user(&db, "a@example.com");
        let b = user(&db, "b@example.com");
        db.add_favorite(a, b).unwrap();

        assert!(db.block_user(a, b).unwrap());
        assert!(!db.block_user(a, b).unwrap());
        assert!(db.is_blocked(a, b).unwrap());
        assert!(!db.is_blocked(b, a).unwrap());
        assert!(db.list_favorites(a).unwrap().is_empty());

        assert!(db.unblock_user(a, b).unwrap());
        assert!(!db.is_blocked(a, b).unwrap());
    }

    #[test]
    fn duplicate_report_is_rejected() {
        let db = db();
        let a = user(&db, "a@example.com");
        let b = user(&db, "b@example.com");

        assert!(db.create_report(a, b, "spam", None).unwrap());
        assert!(!db.create_report(a, b, "spam again", Some("still")).unwrap());
        assert!(db.create_report(b, a, "rude", None).unwrap());
    }
}
