use rusqlite::Connection;
use tracing::info;

use crate::Result;

/// Latest schema version this build knows how to produce.
pub const SCHEMA_VERSION: i64 = 1;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version = current_version(conn)?;

    if version < 1 {
        info!("Running migration v1 (users, novels, bookmarks)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id              INTEGER PRIMARY KEY,
                name            TEXT NOT NULL UNIQUE,
                credential_hash TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE novels (
                id          INTEGER PRIMARY KEY,
                name        TEXT NOT NULL,
                site_name   TEXT,
                pattern_url TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- A user's bookmarks go with the user; a followed novel cannot be
            -- deleted. Not RESTRICT: SQLite reports that as a trigger failure.
            CREATE TABLE bookmarks (
                id          INTEGER PRIMARY KEY,
                user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                novel_id    INTEGER NOT NULL REFERENCES novels(id),
                state       INTEGER NOT NULL DEFAULT 0,
                url         TEXT,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_bookmarks_user ON bookmarks(user_id);
            CREATE INDEX idx_bookmarks_novel ON bookmarks(novel_id);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete (schema v{})", current_version(conn)?);
    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| {
        r.get(0)
    })?;
    Ok(version)
}
