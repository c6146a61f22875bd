use rusqlite::{Connection, Result};

/// Initialise episode tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS episodes (
            episode_id  TEXT PRIMARY KEY,
            session_id  TEXT NOT NULL,
            start_time  REAL NOT NULL,
            end_time    REAL,
            topics      TEXT NOT NULL DEFAULT '[]',
            summary     TEXT,
            metadata    TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_episodes_session
            ON episodes(session_id, start_time);
        CREATE INDEX IF NOT EXISTS idx_episodes_start
            ON episodes(start_time);

        CREATE TABLE IF NOT EXISTS episode_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            episode_id  TEXT NOT NULL,
            speaker     TEXT NOT NULL,
            content     TEXT NOT NULL,
            timestamp   REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_episode
            ON episode_messages(episode_id, timestamp);",
    )
}
