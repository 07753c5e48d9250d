//! Read-Tracking Engine: the single source of truth for "is message M
//! read by user U" and for aggregate unread counts.
//!
//! Receipt existence means read, absence means unread, and a sender is
//! never unread on their own message. Everything here is a pure data
//! consistency primitive — membership checks belong to the service layer.

use rusqlite::Connection;

use parley_types::error::ChatError;

use crate::{Database, Result, map_sqlite};

impl Database {
    /// True iff a receipt exists for (message, user) or the user sent the
    /// message.
    pub fn is_read(&self, message_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| match is_read(conn, message_id, user_id) {
            Ok(read) => Ok(read),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(ChatError::NotFound("message")),
            Err(e) => Err(map_sqlite(e)),
        })
    }

    /// Messages in the conversation not sent by the user and carrying no
    /// receipt for them. Computed as a set difference over the receipt
    /// table, never by iterating messages.
    pub fn unread_count(&self, conversation_id: &str, user_id: i64) -> Result<u64> {
        self.with_conn(|conn| {
            unread_count(conn, conversation_id, user_id)
                .map(|n| n as u64)
                .map_err(map_sqlite)
        })
    }

    /// Inserts a receipt for every unread message in the conversation not
    /// sent by the user. Returns the number of receipts created — 0 on an
    /// immediate second call.
    pub fn mark_all_read(&self, conversation_id: &str, user_id: i64) -> Result<u64> {
        self.with_conn(|conn| {
            mark_all_read(conn, conversation_id, user_id)
                .map(|n| n as u64)
                .map_err(map_sqlite)
        })
    }

    /// Inserts a single receipt if absent. No-op when one already exists
    /// or when the user is the sender; returns whether a receipt was
    /// created.
    pub fn mark_read(&self, message_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let sender_id: i64 = conn
                .query_row(
                    "SELECT sender_id FROM messages WHERE id = ?1",
                    [message_id],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => ChatError::NotFound("message"),
                    other => map_sqlite(other),
                })?;

            if sender_id == user_id {
                return Ok(false);
            }

            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO message_reads (message_id, user_id)
                     VALUES (?1, ?2)",
                    rusqlite::params![message_id, user_id],
                )
                .map_err(map_sqlite)?;
            Ok(inserted > 0)
        })
    }
}

/// One INSERT OR IGNORE over the anti-join of messages against receipts.
/// INSERT OR IGNORE makes concurrent passes for the same (conversation,
/// user) collapse onto the composite primary key instead of double
/// counting.
pub(crate) fn mark_all_read(
    conn: &Connection,
    conversation_id: &str,
    user_id: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO message_reads (message_id, user_id)
         SELECT m.id, ?2 FROM messages m
         LEFT JOIN message_reads mr
           ON mr.message_id = m.id AND mr.user_id = ?2
         WHERE m.conversation_id = ?1
           AND mr.message_id IS NULL
           AND m.sender_id != ?2",
        rusqlite::params![conversation_id, user_id],
    )
}

pub(crate) fn unread_count(
    conn: &Connection,
    conversation_id: &str,
    user_id: i64,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages m
         LEFT JOIN message_reads mr
           ON mr.message_id = m.id AND mr.user_id = ?2
         WHERE m.conversation_id = ?1
           AND m.sender_id != ?2
           AND mr.message_id IS NULL",
        rusqlite::params![conversation_id, user_id],
        |row| row.get(0),
    )
}

pub(crate) fn is_read(
    conn: &Connection,
    message_id: i64,
    user_id: i64,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT m.sender_id = ?2
                OR EXISTS (SELECT 1 FROM message_reads mr
                           WHERE mr.message_id = m.id AND mr.user_id = ?2)
         FROM messages m WHERE m.id = ?1",
        rusqlite::params![message_id, user_id],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use parley_types::api::ConversationKind;
    use parley_types::error::ChatError;

    use crate::Database;

    fn db_with_pair() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", None).unwrap();
        let bob = db.create_user("bob", None).unwrap();
        db.create_conversation("conv1", "Alice & Bob", ConversationKind::Direct, &[alice, bob])
            .unwrap();
        (db, alice, bob)
    }

    #[test]
    fn sender_is_never_unread_on_own_message() {
        let (db, alice, bob) = db_with_pair();
        let msg = db.insert_message("conv1", alice, "Hello!").unwrap();

        assert!(db.is_read(msg.id, alice).unwrap());
        assert!(!db.is_read(msg.id, bob).unwrap());
        assert_eq!(db.unread_count("conv1", alice).unwrap(), 0);
        assert_eq!(db.unread_count("conv1", bob).unwrap(), 1);
    }

    #[test]
    fn mark_all_read_is_idempotent() {
        let (db, alice, bob) = db_with_pair();
        for _ in 0..3 {
            db.insert_message("conv1", alice, "ping").unwrap();
        }

        assert_eq!(db.mark_all_read("conv1", bob).unwrap(), 3);
        assert_eq!(db.mark_all_read("conv1", bob).unwrap(), 0);
        assert_eq!(db.unread_count("conv1", bob).unwrap(), 0);
    }

    #[test]
    fn mark_read_never_creates_a_second_receipt() {
        let (db, alice, bob) = db_with_pair();
        let msg = db.insert_message("conv1", alice, "Hello!").unwrap();

        assert!(db.mark_read(msg.id, bob).unwrap());
        assert!(!db.mark_read(msg.id, bob).unwrap());

        let receipts: i64 = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM message_reads
                     WHERE message_id = ?1 AND user_id = ?2",
                    rusqlite::params![msg.id, bob],
                    |row| row.get(0),
                )
                .map_err(crate::map_sqlite)
            })
            .unwrap();
        assert_eq!(receipts, 1);
    }

    #[test]
    fn mark_read_ignores_the_sender() {
        let (db, alice, _bob) = db_with_pair();
        let msg = db.insert_message("conv1", alice, "Hello!").unwrap();

        assert!(!db.mark_read(msg.id, alice).unwrap());
        let receipts: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM message_reads", [], |row| row.get(0))
                    .map_err(crate::map_sqlite)
            })
            .unwrap();
        assert_eq!(receipts, 0);
    }

    #[test]
    fn mark_read_on_missing_message_is_not_found() {
        let (db, _alice, bob) = db_with_pair();
        assert!(matches!(
            db.mark_read(999, bob).unwrap_err(),
            ChatError::NotFound(_)
        ));
    }

    #[test]
    fn unread_count_tracks_any_send_and_mark_sequence() {
        let (db, alice, bob) = db_with_pair();

        let m1 = db.insert_message("conv1", alice, "one").unwrap();
        db.insert_message("conv1", alice, "two").unwrap();
        db.insert_message("conv1", bob, "reply").unwrap();
        assert_eq!(db.unread_count("conv1", bob).unwrap(), 2);
        assert_eq!(db.unread_count("conv1", alice).unwrap(), 1);

        db.mark_read(m1.id, bob).unwrap();
        assert_eq!(db.unread_count("conv1", bob).unwrap(), 1);

        db.mark_all_read("conv1", bob).unwrap();
        db.insert_message("conv1", alice, "three").unwrap();
        assert_eq!(db.unread_count("conv1", bob).unwrap(), 1);
        assert_eq!(db.unread_count("conv1", alice).unwrap(), 1);
    }

    #[test]
    fn open_conversation_marks_then_fetches() {
        let (db, alice, bob) = db_with_pair();
        db.insert_message("conv1", alice, "Hello!").unwrap();

        let (marked, rows) = db.open_conversation("conv1", bob, 50).unwrap();
        assert_eq!(marked, 1);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_read);
        assert_eq!(db.unread_count("conv1", bob).unwrap(), 0);

        // Second open has nothing left to mark.
        let (marked, _) = db.open_conversation("conv1", bob, 50).unwrap();
        assert_eq!(marked, 0);
    }
}
