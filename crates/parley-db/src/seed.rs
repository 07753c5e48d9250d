//! Demo data for a fresh database: a handful of users, one direct
//! conversation and one group. Runs only when the users table is empty,
//! so restarts never duplicate anything.

use tracing::info;

use parley_types::api::ConversationKind;

use crate::{Database, Result, map_sqlite};

pub fn run(db: &Database) -> Result<()> {
    let user_count: i64 = db.with_conn(|conn| {
        conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .map_err(map_sqlite)
    })?;

    if user_count > 0 {
        return Ok(());
    }

    let names = ["alice", "bob", "carol", "dave", "erin", "frank"];
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        ids.push(db.create_user(name, Some(&format!("{name}.png")))?);
    }

    db.create_conversation(
        "conv1",
        "Alice & Bob",
        ConversationKind::Direct,
        &[ids[0], ids[1]],
    )?;
    db.create_conversation("group1", "Project Room", ConversationKind::Group, &ids)?;

    info!("Seeded {} demo users and 2 conversations", ids.len());
    Ok(())
}
