use rusqlite::Connection;
use tracing::info;

use crate::{Result, map_sqlite};

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            avatar      TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            type        TEXT NOT NULL CHECK (type IN ('direct', 'group')),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS conversation_members (
            conversation_id TEXT NOT NULL
                REFERENCES conversations(id) ON DELETE CASCADE,
            user_id         INTEGER NOT NULL
                REFERENCES users(id) ON DELETE CASCADE,
            joined_at       TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL
                REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id       INTEGER NOT NULL
                REFERENCES users(id) ON DELETE CASCADE,
            content         TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, id);

        -- Receipt existence means read; absence means unread. The composite
        -- primary key is the backstop that collapses concurrent mark-read
        -- attempts for the same (message, user) into a single row.
        CREATE TABLE IF NOT EXISTS message_reads (
            message_id  INTEGER NOT NULL
                REFERENCES messages(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL
                REFERENCES users(id) ON DELETE CASCADE,
            read_at     TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (message_id, user_id)
        );
        ",
    )
    .map_err(map_sqlite)?;

    info!("Database migrations complete");
    Ok(())
}
