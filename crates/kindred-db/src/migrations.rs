use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            email           TEXT NOT NULL UNIQUE,
            phone           TEXT UNIQUE,
            password        TEXT NOT NULL,
            first_name      TEXT NOT NULL,
            last_name       TEXT NOT NULL,
            date_of_birth   TEXT NOT NULL,
            gender          TEXT NOT NULL,
            bio             TEXT,
            location        TEXT,
            latitude        REAL,
            longitude       REAL,
            is_verified     INTEGER NOT NULL DEFAULT 0,
            is_active       INTEGER NOT NULL DEFAULT 1,
            is_online       INTEGER NOT NULL DEFAULT 0,
            last_seen       TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS profile_photos (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            url         TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            is_primary  INTEGER NOT NULL DEFAULT 0,
            sort_order  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_photos_user
            ON profile_photos(user_id, sort_order);

        CREATE TABLE IF NOT EXISTS interests (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            category    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_interests (
            user_id     INTEGER NOT NULL REFERENCES users(id),
            interest_id INTEGER NOT NULL REFERENCES interests(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, interest_id)
        );

        CREATE TABLE IF NOT EXISTS otps (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            email       TEXT NOT NULL,
            phone       TEXT,
            code        TEXT NOT NULL,
            expires_at  TEXT NOT NULL,
            is_used     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_otps_email ON otps(email, code);

        CREATE TABLE IF NOT EXISTS blocked_users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            blocker_id  INTEGER NOT NULL REFERENCES users(id),
            blocked_id  INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(blocker_id, blocked_id)
        );

        CREATE TABLE IF NOT EXISTS favorites (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            favorite_id INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_id, favorite_id)
        );

        CREATE TABLE IF NOT EXISTS reports (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            reporter_id INTEGER NOT NULL REFERENCES users(id),
            reported_id INTEGER NOT NULL REFERENCES users(id),
            reason      TEXT NOT NULL,
            description TEXT,
            status      TEXT NOT NULL DEFAULT 'pending',
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(reporter_id, reported_id)
        );

        CREATE TABLE IF NOT EXISTS likes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            liker_id    INTEGER NOT NULL REFERENCES users(id),
            liked_id    INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(liker_id, liked_id)
        );

        CREATE TABLE IF NOT EXISTS dislikes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            disliker_id INTEGER NOT NULL REFERENCES users(id),
            disliked_id INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(disliker_id, disliked_id)
        );

        -- user_a is the later liker; pair_low/pair_high order the pair for the index
        CREATE TABLE IF NOT EXISTS matches (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_a      INTEGER NOT NULL REFERENCES users(id),
            user_b      INTEGER NOT NULL REFERENCES users(id),
            pair_low    INTEGER NOT NULL,
            pair_high   INTEGER NOT NULL,
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_matches_active_pair
            ON matches(pair_low, pair_high) WHERE is_active = 1;

        CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id    INTEGER NOT NULL UNIQUE REFERENCES matches(id),
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id),
            sender_id       INTEGER NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            message_type    TEXT NOT NULL DEFAULT 'text',
            is_read         INTEGER NOT NULL DEFAULT 0,
            read_at         TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, id);

        CREATE TABLE IF NOT EXISTS notifications (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            kind        TEXT NOT NULL,
            title       TEXT NOT NULL,
            body        TEXT NOT NULL,
            data        TEXT NOT NULL DEFAULT '{}',
            is_read     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS admins (
            user_id     INTEGER PRIMARY KEY REFERENCES users(id),
            role        TEXT NOT NULL,
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS user_activities (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            action      TEXT NOT NULL,
            ip_address  TEXT,
            user_agent  TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Seed the interest catalogue
        INSERT OR IGNORE INTO interests (name, category) VALUES
            ('Coffee ceremony', 'culture'),
            ('Music', 'arts'),
            ('Dancing', 'arts'),
            ('Football', 'sports'),
            ('Running', 'sports'),
            ('Hiking', 'outdoors'),
            ('Travel', 'lifestyle'),
            ('Cooking', 'lifestyle'),
            ('Reading', 'learning'),
            ('Technology', 'learning'),
            ('Faith', 'values'),
            ('Volunteering', 'values');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
