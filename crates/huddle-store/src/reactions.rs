//! Emoji reactions on room messages.

use std::collections::HashMap;

use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Reaction, ReactionGroup};
use crate::row::{now, ts_col, ts_param, uuid_col};

impl Database {
    /// Add a reaction. At most one row exists per (message, user, emoji);
    /// repeating the call returns the row that is already there.
    pub fn add_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<Reaction> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO reactions (id, message_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                message_id.to_string(),
                user_id.to_string(),
                emoji,
                ts_param(&now()),
            ],
        )?;

        let reaction = self.conn().query_row(
            "SELECT id, message_id, user_id, emoji, created_at
             FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id.to_string(), user_id.to_string(), emoji],
            row_to_reaction,
        )?;

        if inserted > 0 {
            tracing::debug!(message_id = %message_id, user_id = %user_id, emoji, "added reaction");
        }
        Ok(reaction)
    }

    /// Remove a reaction if present. Returns whether a row was deleted.
    pub fn remove_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id.to_string(), user_id.to_string(), emoji],
        )?;
        Ok(affected > 0)
    }

    pub fn reactions_for_message(&self, message_id: Uuid) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, message_id, user_id, emoji, created_at
             FROM reactions WHERE message_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![message_id.to_string()], row_to_reaction)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Every reaction grouped by message, then by emoji in first-use order.
    pub(crate) fn reaction_groups_by_message(&self) -> Result<HashMap<Uuid, Vec<ReactionGroup>>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, message_id, user_id, emoji, created_at
             FROM reactions ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], row_to_reaction)?;

        let mut map: HashMap<Uuid, Vec<ReactionGroup>> = HashMap::new();
        for row in rows {
            let reaction = row?;
            let groups = map.entry(reaction.message_id).or_default();
            match groups.iter_mut().find(|g| g.emoji == reaction.emoji) {
                Some(group) => group.user_ids.push(reaction.user_id),
                None => groups.push(ReactionGroup {
                    emoji: reaction.emoji,
                    user_ids: vec![reaction.user_id],
                }),
            }
        }
        Ok(map)
    }
}

fn row_to_reaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        id: uuid_col(row, 0)?,
        message_id: uuid_col(row, 1)?,
        user_id: uuid_col(row, 2)?,
        emoji: row.get(3)?,
        created_at: ts_col(row, 4)?,
    })
}
