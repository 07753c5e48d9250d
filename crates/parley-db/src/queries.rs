use rusqlite::Connection;

use parley_types::api::ConversationKind;
use parley_types::error::ChatError;

use crate::models::{
    ConversationSummaryRow, InsertedMessage, MemberRow, MessageRow, UserRow,
};
use crate::{Database, Result, map_sqlite, reads};

impl Database {
    // -- Users --

    pub fn create_user(&self, name: &str, avatar: Option<&str>) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO users (name, avatar) VALUES (?1, ?2) RETURNING id",
                rusqlite::params![name, avatar],
                |row| row.get(0),
            )
            .map_err(map_sqlite)
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id).map_err(map_sqlite))
    }

    // -- Conversations --

    /// Creates a conversation with a fixed member set. Membership is not
    /// mutable afterwards.
    pub fn create_conversation(
        &self,
        id: &str,
        name: &str,
        kind: ConversationKind,
        member_ids: &[i64],
    ) -> Result<()> {
        match kind {
            ConversationKind::Direct if member_ids.len() != 2 => {
                return Err(ChatError::InvalidArgument(
                    "a direct conversation has exactly 2 members",
                ));
            }
            ConversationKind::Group if member_ids.len() < 2 => {
                return Err(ChatError::InvalidArgument(
                    "a group conversation needs at least 2 members",
                ));
            }
            _ => {}
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(map_sqlite)?;
            tx.execute(
                "INSERT INTO conversations (id, name, type) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, name, kind.as_str()],
            )
            .map_err(map_sqlite)?;
            for user_id in member_ids {
                tx.execute(
                    "INSERT INTO conversation_members (conversation_id, user_id)
                     VALUES (?1, ?2)",
                    rusqlite::params![id, user_id],
                )
                .map_err(map_sqlite)?;
            }
            tx.commit().map_err(map_sqlite)
        })
    }

    pub fn conversation_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| conversation_exists(conn, id).map_err(map_sqlite))
    }

    pub fn is_member(&self, conversation_id: &str, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| is_member(conn, conversation_id, user_id).map_err(map_sqlite))
    }

    /// Conversation ids the user belongs to — used by the gateway to join
    /// the session to its rooms at identify time.
    pub fn member_conversations(&self, user_id: i64) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT conversation_id FROM conversation_members
                     WHERE user_id = ?1
                     ORDER BY conversation_id",
                )
                .map_err(map_sqlite)?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))
                .map_err(map_sqlite)?
                .collect::<std::result::Result<Vec<String>, _>>()
                .map_err(map_sqlite)?;
            Ok(ids)
        })
    }

    /// Every conversation the user is a member of, with a freshly computed
    /// unread count (anti-join against receipts) and member count. For
    /// direct conversations the displayed name is the other member's name.
    pub fn list_conversations(&self, user_id: i64) -> Result<Vec<ConversationSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT c.id,
                            CASE WHEN c.type = 'direct' THEN
                                COALESCE(
                                    (SELECT u.name FROM users u
                                     JOIN conversation_members om ON om.user_id = u.id
                                     WHERE om.conversation_id = c.id
                                       AND om.user_id != ?1
                                     LIMIT 1),
                                    c.name)
                            ELSE c.name END AS name,
                            c.type,
                            COALESCE(unread.n, 0) AS unread_count,
                            (SELECT COUNT(*) FROM conversation_members cm2
                             WHERE cm2.conversation_id = c.id) AS member_count
                     FROM conversations c
                     JOIN conversation_members cm
                       ON cm.conversation_id = c.id AND cm.user_id = ?1
                     LEFT JOIN (
                         SELECT m.conversation_id, COUNT(*) AS n
                         FROM messages m
                         LEFT JOIN message_reads mr
                           ON mr.message_id = m.id AND mr.user_id = ?1
                         WHERE mr.message_id IS NULL AND m.sender_id != ?1
                         GROUP BY m.conversation_id
                     ) unread ON unread.conversation_id = c.id
                     ORDER BY unread_count DESC, c.created_at DESC, c.id ASC",
                )
                .map_err(map_sqlite)?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationSummaryRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get(2)?,
                        unread_count: row.get(3)?,
                        member_count: row.get(4)?,
                    })
                })
                .map_err(map_sqlite)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(map_sqlite)?;

            Ok(rows)
        })
    }

    pub fn get_members(&self, conversation_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            if !conversation_exists(conn, conversation_id).map_err(map_sqlite)? {
                return Err(ChatError::NotFound("conversation"));
            }

            let mut stmt = conn
                .prepare(
                    "SELECT u.id, u.name, u.avatar
                     FROM users u
                     JOIN conversation_members cm ON cm.user_id = u.id
                     WHERE cm.conversation_id = ?1
                     ORDER BY u.id",
                )
                .map_err(map_sqlite)?;
            let rows = stmt
                .query_map([conversation_id], |row| {
                    Ok(MemberRow {
                        user_id: row.get(0)?,
                        name: row.get(1)?,
                        avatar: row.get(2)?,
                    })
                })
                .map_err(map_sqlite)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(map_sqlite)?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Inserts a message and returns the store-assigned id and timestamp.
    /// Ids come from AUTOINCREMENT under the connection lock, so they are
    /// strictly increasing and unique across concurrent sends.
    pub fn insert_message(
        &self,
        conversation_id: &str,
        sender_id: i64,
        content: &str,
    ) -> Result<InsertedMessage> {
        self.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO messages (conversation_id, sender_id, content)
                 VALUES (?1, ?2, ?3)
                 RETURNING id, created_at",
                rusqlite::params![conversation_id, sender_id, content],
                |row| {
                    Ok(InsertedMessage {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                    })
                },
            )
            .map_err(map_sqlite)
        })
    }

    /// The "open a conversation" fetch: marks everything unread for the
    /// viewer as read, then returns the most recent `limit` messages in
    /// creation order. Both steps run under one connection guard, so a
    /// concurrent fetch by the same viewer cannot interleave between them;
    /// a message inserted after the mark pass stays unread until the next
    /// pass. Returns (newly marked count, window).
    pub fn open_conversation(
        &self,
        conversation_id: &str,
        user_id: i64,
        limit: u32,
    ) -> Result<(u64, Vec<MessageRow>)> {
        self.with_conn(|conn| {
            let marked =
                reads::mark_all_read(conn, conversation_id, user_id).map_err(map_sqlite)?;
            let rows =
                recent_messages(conn, conversation_id, user_id, limit).map_err(map_sqlite)?;
            Ok((marked as u64, rows))
        })
    }

    /// Recent message window without the mark-as-read side effect.
    pub fn recent_messages(
        &self,
        conversation_id: &str,
        viewer_id: i64,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            recent_messages(conn, conversation_id, viewer_id, limit).map_err(map_sqlite)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, name, avatar, created_at FROM users WHERE id = ?1")?;

    stmt.query_row([id], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            name: row.get(1)?,
            avatar: row.get(2)?,
            created_at: row.get(3)?,
        })
    })
    .optional()
}

fn conversation_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM conversations WHERE id = ?1",
        [id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn is_member(conn: &Connection, conversation_id: &str, user_id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM conversation_members
         WHERE conversation_id = ?1 AND user_id = ?2",
        rusqlite::params![conversation_id, user_id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

/// The most recent `limit` messages, reordered oldest-to-newest, each
/// annotated with the sender name and the viewer's read state. A message
/// is read for the viewer when a receipt exists or the viewer sent it.
fn recent_messages(
    conn: &Connection,
    conversation_id: &str,
    viewer_id: i64,
    limit: u32,
) -> rusqlite::Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, sender_name, content, created_at, is_read
         FROM (
             SELECT m.id, m.conversation_id, m.sender_id,
                    u.name AS sender_name, m.content, m.created_at,
                    CASE WHEN m.sender_id = ?2 OR mr.user_id IS NOT NULL
                         THEN 1 ELSE 0 END AS is_read
             FROM messages m
             JOIN users u ON u.id = m.sender_id
             LEFT JOIN message_reads mr
               ON mr.message_id = m.id AND mr.user_id = ?2
             WHERE m.conversation_id = ?1
             ORDER BY m.id DESC
             LIMIT ?3
         )
         ORDER BY id ASC",
    )?;

    let rows = stmt
        .query_map(
            rusqlite::params![conversation_id, viewer_id, limit],
            |row| {
                Ok(MessageRow {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    sender_name: row.get(3)?,
                    content: row.get(4)?,
                    created_at: row.get(5)?,
                    is_read: row.get(6)?,
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
