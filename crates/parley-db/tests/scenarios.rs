//! End-to-end read-tracking scenarios over the public Database API.

use parley_db::Database;
use parley_types::api::ConversationKind;
use parley_types::error::ChatError;

fn setup() -> Database {
    let db = Database::open_in_memory().unwrap();
    for name in ["alice", "bob", "carol", "dave", "erin", "frank"] {
        db.create_user(name, None).unwrap();
    }
    db.create_conversation("conv1", "Alice & Bob", ConversationKind::Direct, &[1, 2])
        .unwrap();
    db.create_conversation(
        "group1",
        "Project Room",
        ConversationKind::Group,
        &[1, 2, 3, 4, 5, 6],
    )
    .unwrap();
    db
}

#[test]
fn direct_message_is_unread_for_the_recipient_only() {
    let db = setup();

    db.insert_message("conv1", 1, "Hello!").unwrap();

    assert_eq!(db.unread_count("conv1", 2).unwrap(), 1);
    assert_eq!(db.unread_count("conv1", 1).unwrap(), 0);
}

#[test]
fn opening_a_conversation_marks_it_read() {
    let db = setup();
    db.insert_message("conv1", 1, "Hello!").unwrap();

    let (marked, messages) = db.open_conversation("conv1", 2, 50).unwrap();
    assert_eq!(marked, 1);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_read);
    assert_eq!(messages[0].sender_name, "alice");
    assert_eq!(db.unread_count("conv1", 2).unwrap(), 0);
}

#[test]
fn group_message_is_unread_for_every_other_member() {
    let db = setup();
    db.insert_message("group1", 1, "standup in 5").unwrap();

    assert_eq!(db.unread_count("group1", 1).unwrap(), 0);
    for member in 2..=6 {
        assert_eq!(db.unread_count("group1", member).unwrap(), 1);
    }
}

#[test]
fn one_member_reading_does_not_affect_the_others() {
    let db = setup();
    db.insert_message("group1", 1, "standup in 5").unwrap();

    db.mark_all_read("group1", 3).unwrap();

    assert_eq!(db.unread_count("group1", 3).unwrap(), 0);
    assert_eq!(db.unread_count("group1", 2).unwrap(), 1);
    assert_eq!(db.unread_count("group1", 4).unwrap(), 1);
}

#[test]
fn window_is_read_relative_to_the_viewer() {
    let db = setup();
    db.insert_message("conv1", 1, "Hello!").unwrap();
    db.insert_message("conv1", 2, "Hi back").unwrap();

    // Alice has not opened the conversation: Bob's reply is unread for
    // her, her own message reads as read.
    let rows = db.recent_messages("conv1", 1, 50).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].is_read);
    assert!(!rows[1].is_read);
}

#[test]
fn failed_sends_leave_no_rows_behind() {
    let db = setup();

    // Unknown sender trips the foreign key.
    assert!(matches!(
        db.insert_message("conv1", 99, "ghost").unwrap_err(),
        ChatError::NotFound(_)
    ));

    let count: i64 = db
        .with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
                .map_err(|e| parley_types::error::ChatError::Unavailable(e.to_string()))
        })
        .unwrap();
    assert_eq!(count, 0);
}
