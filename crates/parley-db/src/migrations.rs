use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Read side of the external identity system. This core only queries
        -- it; rows are provisioned out of band (or via upsert_user).
        CREATE TABLE IF NOT EXISTS users (
            id    TEXT PRIMARY KEY,
            name  TEXT NOT NULL
        );

        -- Participants are stored canonically (user_a < user_b byte-wise).
        -- The UNIQUE constraint arbitrates concurrent first contact: at most
        -- one row per pair, whichever process loses the race re-fetches.
        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            user_a      TEXT NOT NULL,
            user_b      TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(user_a, user_b)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            sender_id        TEXT NOT NULL,
            receiver_id      TEXT NOT NULL,
            text             TEXT NOT NULL,
            is_read          INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver_id, is_read, sender_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
