use rusqlite::Connection;
use tracing::info;

use crate::StoreError;

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                first_name      TEXT NOT NULL,
                last_name       TEXT NOT NULL,
                email           TEXT NOT NULL UNIQUE,
                password        TEXT NOT NULL,
                logged_in       INTEGER NOT NULL DEFAULT 0,
                last_login      TEXT,
                relationship_id TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE relationships (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL UNIQUE REFERENCES users(id)
            );

            -- One row per peer id in one of the five invitation sets
            CREATE TABLE relationship_entries (
                relationship_id TEXT NOT NULL REFERENCES relationships(id) ON DELETE CASCADE,
                kind            TEXT NOT NULL,
                peer_id         TEXT NOT NULL,
                added_at        INTEGER NOT NULL,
                PRIMARY KEY (relationship_id, kind, peer_id)
            );

            CREATE TABLE friends (
                user_id     TEXT NOT NULL REFERENCES users(id),
                friend_id   TEXT NOT NULL REFERENCES users(id),
                since       INTEGER NOT NULL,
                PRIMARY KEY (user_id, friend_id)
            );

            CREATE TABLE chats (
                id          TEXT PRIMARY KEY,
                user_low    TEXT NOT NULL,
                user_high   TEXT NOT NULL,
                UNIQUE (user_low, user_high)
            );

            CREATE TABLE messages (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     TEXT NOT NULL REFERENCES chats(id),
                sender_id   TEXT NOT NULL,
                body        TEXT NOT NULL,
                sent_at     INTEGER NOT NULL
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, sent_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }
}
