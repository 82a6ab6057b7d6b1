use rusqlite::Connection;
use tracing::info;

use crate::error::StoreResult;

pub fn run(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            about       TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per conversation; doubles as the denormalized summary.
        -- member_count/message_count are maintained in the same transaction
        -- as the rows they count.
        CREATE TABLE IF NOT EXISTS conversations (
            id                   TEXT PRIMARY KEY,
            member_count         INTEGER NOT NULL,
            message_count        INTEGER NOT NULL DEFAULT 0,
            last_message         TEXT,
            last_message_user_id TEXT,
            last_message_sent_on TEXT,
            created_at           TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS members (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            joined_at       TEXT NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_members_user
            ON members(user_id);

        -- Append-only: rows are never updated or deleted. seq is both the
        -- public message id and the ordering key.
        CREATE TABLE IF NOT EXISTS messages (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            sent_at         TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, seq);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
