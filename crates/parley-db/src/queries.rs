use crate::Database;
use crate::models::{ConversationRow, MessageRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    /// Provisioning/test helper. Users are owned by the external identity
    /// system; the core itself only ever reads this table.
    pub fn upsert_user(&self, id: &str, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                (id, name),
            )?;
            Ok(())
        })
    }

    pub fn get_users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, name FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Conversations --

    /// Create the row for a canonical pair unless one already exists.
    /// Safe under concurrent first contact: the UNIQUE(user_a, user_b)
    /// constraint swallows the losing insert, and the caller re-fetches.
    pub fn insert_conversation_if_absent(
        &self,
        id: &str,
        user_a: &str,
        user_b: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, user_a, user_b, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_a, user_b) DO NOTHING",
                (id, user_a, user_b, created_at),
            )?;
            Ok(())
        })
    }

    pub fn find_conversation(&self, user_a: &str, user_b: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation(conn, user_a, user_b))
    }

    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_a, user_b, created_at FROM conversations
                 WHERE user_a = ?1 OR user_b = ?1",
            )?;

            let rows = stmt
                .query_map([user_id], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        text: &str,
        is_read: bool,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, text, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, conversation_id, sender_id, receiver_id, text, is_read, created_at],
            )?;
            Ok(())
        })
    }

    /// Full history of one conversation, creation order. The rowid tiebreak
    /// keeps same-timestamp messages in insertion order.
    pub fn messages_in_conversation(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, receiver_id, text, is_read, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;

            let rows = stmt
                .query_map([conversation_id], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Mark every unread message addressed to `receiver_id` in the
    /// conversation as read. Set-based and scoped by is_read = 0, so it is
    /// idempotent against a message that was already read on arrival.
    /// Returns the number of rows that actually flipped.
    pub fn mark_conversation_read(&self, conversation_id: &str, receiver_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE conversation_id = ?1 AND receiver_id = ?2 AND is_read = 0",
                (conversation_id, receiver_id),
            )?;
            Ok(updated)
        })
    }

    pub fn unread_count(&self, conversation_id: &str, receiver_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND receiver_id = ?2 AND is_read = 0",
                (conversation_id, receiver_id),
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Unread totals addressed to `receiver_id`, grouped by sender — one
    /// query feeding the whole conversation listing.
    pub fn unread_counts_by_sender(&self, receiver_id: &str) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND is_read = 0
                 GROUP BY sender_id",
            )?;

            let rows = stmt
                .query_map([receiver_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_conversation(
    conn: &Connection,
    user_a: &str,
    user_b: &str,
) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_a, user_b, created_at FROM conversations
         WHERE user_a = ?1 AND user_b = ?2",
    )?;

    let row = stmt.query_row([user_a, user_b], map_conversation_row).optional()?;

    Ok(row)
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_a: row.get(1)?,
        user_b: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        text: row.get(4)?,
        is_read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn conversation_pair_maps_to_one_row() {
        let db = db();

        db.insert_conversation_if_absent("c1", "u1", "u2", "2026-01-01T00:00:00Z")
            .unwrap();
        // Second insert for the same pair loses silently
        db.insert_conversation_if_absent("c2", "u1", "u2", "2026-01-01T00:00:01Z")
            .unwrap();

        let found = db.find_conversation("u1", "u2").unwrap().unwrap();
        assert_eq!(found.id, "c1");

        let rows = db.conversations_for_user("u1").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn mark_read_scopes_to_receiver_and_unread() {
        let db = db();
        db.insert_conversation_if_absent("c1", "u1", "u2", "2026-01-01T00:00:00Z")
            .unwrap();
        db.insert_message("m1", "c1", "u1", "u2", "one", false, "2026-01-01T00:00:01Z")
            .unwrap();
        db.insert_message("m2", "c1", "u1", "u2", "two", true, "2026-01-01T00:00:02Z")
            .unwrap();
        db.insert_message("m3", "c1", "u2", "u1", "reply", false, "2026-01-01T00:00:03Z")
            .unwrap();

        // Only m1 is unread and addressed to u2
        assert_eq!(db.mark_conversation_read("c1", "u2").unwrap(), 1);
        assert_eq!(db.unread_count("c1", "u2").unwrap(), 0);

        // u1's unread reply is untouched
        assert_eq!(db.unread_count("c1", "u1").unwrap(), 1);

        // Idempotent on re-run
        assert_eq!(db.mark_conversation_read("c1", "u2").unwrap(), 0);
    }

    #[test]
    fn unread_counts_group_by_sender() {
        let db = db();
        db.insert_conversation_if_absent("c1", "u1", "u9", "2026-01-01T00:00:00Z")
            .unwrap();
        db.insert_conversation_if_absent("c2", "u2", "u9", "2026-01-01T00:00:00Z")
            .unwrap();
        db.insert_message("m1", "c1", "u1", "u9", "a", false, "2026-01-01T00:00:01Z")
            .unwrap();
        db.insert_message("m2", "c1", "u1", "u9", "b", false, "2026-01-01T00:00:02Z")
            .unwrap();
        db.insert_message("m3", "c2", "u2", "u9", "c", false, "2026-01-01T00:00:03Z")
            .unwrap();
        db.insert_message("m4", "c2", "u2", "u9", "d", true, "2026-01-01T00:00:04Z")
            .unwrap();

        let mut counts = db.unread_counts_by_sender("u9").unwrap();
        counts.sort();
        assert_eq!(counts, vec![("u1".to_string(), 2), ("u2".to_string(), 1)]);
    }

    #[test]
    fn history_is_ordered_by_creation_time() {
        let db = db();
        db.insert_conversation_if_absent("c1", "u1", "u2", "2026-01-01T00:00:00Z")
            .unwrap();
        db.insert_message("m2", "c1", "u2", "u1", "second", false, "2026-01-01T00:00:02Z")
            .unwrap();
        db.insert_message("m1", "c1", "u1", "u2", "first", false, "2026-01-01T00:00:01Z")
            .unwrap();

        let rows = db.messages_in_conversation("c1").unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn users_fetched_by_id_set() {
        let db = db();
        db.upsert_user("u1", "Alice").unwrap();
        db.upsert_user("u2", "Bob").unwrap();
        db.upsert_user("u1", "Alice Smith").unwrap();

        let users = db
            .get_users_by_ids(&["u1".to_string(), "u2".to_string(), "u3".to_string()])
            .unwrap();
        assert_eq!(users.len(), 2);

        let alice = users.iter().find(|u| u.id == "u1").unwrap();
        assert_eq!(alice.name, "Alice Smith");
    }
}
