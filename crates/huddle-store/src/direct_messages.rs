//! Private conversation between two users.
//!
//! Lock semantics match the room: a locked message can be neither edited
//! nor deleted. Pinning ignores both lock and read state. The store does not
//! look at the handshake; callers gate sending on an accepted request.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::DirectMessage;
use crate::row::{now, not_found, opt_uuid_col, ts_col, ts_param, uuid_col};

const DM_COLUMNS: &str = "id, from_user_id, to_user_id, content, is_edited, is_pinned, \
                          is_read, is_locked, locked_by_user_id, timestamp";

impl Database {
    pub fn send_direct_message(&self, from: Uuid, to: Uuid, content: &str) -> Result<DirectMessage> {
        let message = DirectMessage {
            id: Uuid::new_v4(),
            from_user_id: from,
            to_user_id: to,
            content: content.to_string(),
            is_edited: false,
            is_pinned: false,
            is_read: false,
            is_locked: false,
            locked_by_user_id: None,
            timestamp: now(),
        };

        self.conn().execute(
            "INSERT INTO direct_messages (id, from_user_id, to_user_id, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                from.to_string(),
                to.to_string(),
                message.content,
                ts_param(&message.timestamp),
            ],
        )?;

        tracing::debug!(dm_id = %message.id, from = %from, to = %to, "sent direct message");
        Ok(message)
    }

    pub fn get_direct_message(&self, id: Uuid) -> Result<DirectMessage> {
        self.conn()
            .query_row(
                &format!("SELECT {DM_COLUMNS} FROM direct_messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_direct_message,
            )
            .map_err(not_found)
    }

    /// Both directions of the conversation between `a` and `b`, oldest first.
    pub fn direct_thread(&self, a: Uuid, b: Uuid) -> Result<Vec<DirectMessage>> {
        self.query_thread(a, b, false)
    }

    /// Pinned messages of the conversation between `a` and `b`.
    pub fn pinned_direct_messages(&self, a: Uuid, b: Uuid) -> Result<Vec<DirectMessage>> {
        self.query_thread(a, b, true)
    }

    fn query_thread(&self, a: Uuid, b: Uuid, pinned_only: bool) -> Result<Vec<DirectMessage>> {
        let pinned_clause = if pinned_only { "AND is_pinned = 1" } else { "" };
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {DM_COLUMNS} FROM direct_messages
             WHERE ((from_user_id = ?1 AND to_user_id = ?2)
                 OR (from_user_id = ?2 AND to_user_id = ?1))
             {pinned_clause}
             ORDER BY timestamp ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![a.to_string(), b.to_string()], row_to_direct_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Same contract as [`Database::edit_message`].
    pub fn edit_direct_message(&self, id: Uuid, content: &str) -> Result<DirectMessage> {
        let affected = self.conn().execute(
            "UPDATE direct_messages SET content = ?1, is_edited = 1
             WHERE id = ?2 AND is_locked = 0",
            params![content, id.to_string()],
        )?;
        if affected == 0 {
            return Err(self.classify_direct_miss(id)?);
        }
        self.get_direct_message(id)
    }

    /// Same contract as [`Database::delete_message`].
    pub fn delete_direct_message(&self, id: Uuid) -> Result<()> {
        let affected = self.conn().execute(
            "DELETE FROM direct_messages WHERE id = ?1 AND is_locked = 0",
            params![id.to_string()],
        )?;
        if affected == 0 {
            return Err(self.classify_direct_miss(id)?);
        }
        tracing::debug!(dm_id = %id, "deleted direct message");
        Ok(())
    }

    pub fn lock_direct_message(&self, id: Uuid, by_user_id: Uuid) -> Result<DirectMessage> {
        let affected = self.conn().execute(
            "UPDATE direct_messages SET is_locked = 1, locked_by_user_id = ?1 WHERE id = ?2",
            params![by_user_id.to_string(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_direct_message(id)
    }

    pub fn unlock_direct_message(&self, id: Uuid) -> Result<DirectMessage> {
        let affected = self.conn().execute(
            "UPDATE direct_messages SET is_locked = 0, locked_by_user_id = NULL WHERE id = ?1",
            params![id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_direct_message(id)
    }

    /// Pin or unpin, regardless of lock and read state.
    pub fn set_direct_message_pinned(&self, id: Uuid, pinned: bool) -> Result<DirectMessage> {
        let affected = self.conn().execute(
            "UPDATE direct_messages SET is_pinned = ?1 WHERE id = ?2",
            params![pinned, id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_direct_message(id)
    }

    /// Mark everything `from` sent to `to` as read. Returns how many
    /// messages flipped.
    pub fn mark_direct_messages_read(&self, from: Uuid, to: Uuid) -> Result<usize> {
        let flipped = self.conn().execute(
            "UPDATE direct_messages SET is_read = 1
             WHERE from_user_id = ?1 AND to_user_id = ?2 AND is_read = 0",
            params![from.to_string(), to.to_string()],
        )?;
        if flipped > 0 {
            tracing::debug!(from = %from, to = %to, flipped, "marked direct messages read");
        }
        Ok(flipped)
    }

    /// Unread messages `from` sent to `user_id`.
    pub fn unread_direct_count(&self, user_id: Uuid, from: Uuid) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM direct_messages
             WHERE from_user_id = ?1 AND to_user_id = ?2 AND is_read = 0",
            params![from.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn classify_direct_miss(&self, id: Uuid) -> Result<StoreError> {
        let locked: Option<bool> = self
            .conn()
            .query_row(
                "SELECT is_locked FROM direct_messages WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match locked {
            Some(true) => StoreError::Locked,
            _ => StoreError::NotFound,
        })
    }
}

fn row_to_direct_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirectMessage> {
    Ok(DirectMessage {
        id: uuid_col(row, 0)?,
        from_user_id: uuid_col(row, 1)?,
        to_user_id: uuid_col(row, 2)?,
        content: row.get(3)?,
        is_edited: row.get(4)?,
        is_pinned: row.get(5)?,
        is_read: row.get(6)?,
        is_locked: row.get(7)?,
        locked_by_user_id: opt_uuid_col(row, 8)?,
        timestamp: ts_col(row, 9)?,
    })
}
