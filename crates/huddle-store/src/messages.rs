//! Room messages and their lock rules.
//!
//! The store enforces exactly one data invariant here: a locked message can
//! be neither edited nor deleted. Who may lock, unlock, edit or delete is a
//! policy question answered by the caller.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageView, NewMessage, ReplyPreview, User};
use crate::row::{now, not_found, opt_uuid_col, ts_col, ts_param, uuid_col};

const MESSAGE_COLUMNS: &str = "id, user_id, content, image_url, reply_to_id, \
                               is_edited, is_locked, locked_by_user_id, timestamp";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Post a message. `reply_to_id` is stored as given; it is not checked.
    pub fn create_message(&self, new: &NewMessage) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            content: new.content.clone(),
            image_url: new.image_url.clone(),
            reply_to_id: new.reply_to_id,
            is_edited: false,
            is_locked: false,
            locked_by_user_id: None,
            timestamp: now(),
        };

        self.conn().execute(
            "INSERT INTO messages (id, user_id, content, image_url, reply_to_id,
                                   is_edited, is_locked, locked_by_user_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, NULL, ?6)",
            params![
                message.id.to_string(),
                message.user_id.to_string(),
                message.content,
                message.image_url,
                message.reply_to_id.map(|id| id.to_string()),
                ts_param(&message.timestamp),
            ],
        )?;

        tracing::debug!(message_id = %message.id, user_id = %message.user_id, "created message");
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Raw messages, oldest first; ties keep insertion order.
    pub fn list_messages(&self) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY timestamp ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map([], row_to_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// The room as clients render it: each message with its author, the
    /// message it replies to (and that author), grouped reactions and the
    /// user holding the lock.
    pub fn list_message_views(&self) -> Result<Vec<MessageView>> {
        let messages = self.list_messages()?;
        let users: HashMap<Uuid, User> = self
            .list_users()?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        let by_id: HashMap<Uuid, &Message> = messages.iter().map(|m| (m.id, m)).collect();
        let mut reactions = self.reaction_groups_by_message()?;

        let views = messages
            .iter()
            .map(|message| {
                let reply_to = message
                    .reply_to_id
                    .and_then(|id| by_id.get(&id))
                    .map(|target| ReplyPreview {
                        message: (*target).clone(),
                        user: users.get(&target.user_id).cloned(),
                    });

                MessageView {
                    message: message.clone(),
                    user: users.get(&message.user_id).cloned(),
                    reply_to,
                    reactions: reactions.remove(&message.id).unwrap_or_default(),
                    locked_by: message
                        .locked_by_user_id
                        .and_then(|id| users.get(&id).cloned()),
                }
            })
            .collect();

        Ok(views)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Replace the content and mark the message edited.
    ///
    /// Returns [`StoreError::Locked`] for a locked message and
    /// [`StoreError::NotFound`] for a missing one; neither mutates anything.
    pub fn edit_message(&self, id: Uuid, content: &str) -> Result<Message> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?1, is_edited = 1
             WHERE id = ?2 AND is_locked = 0",
            params![content, id.to_string()],
        )?;
        if affected == 0 {
            return Err(self.classify_message_miss(id)?);
        }

        tracing::debug!(message_id = %id, "edited message");
        self.get_message(id)
    }

    /// Lock a message on behalf of `by_user_id`. Always succeeds for an
    /// existing message, overwriting any previous locker.
    pub fn lock_message(&self, id: Uuid, by_user_id: Uuid) -> Result<Message> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_locked = 1, locked_by_user_id = ?1 WHERE id = ?2",
            params![by_user_id.to_string(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        tracing::debug!(message_id = %id, locked_by = %by_user_id, "locked message");
        self.get_message(id)
    }

    /// Clear the lock, whoever holds it.
    pub fn unlock_message(&self, id: Uuid) -> Result<Message> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_locked = 0, locked_by_user_id = NULL WHERE id = ?1",
            params![id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        tracing::debug!(message_id = %id, "unlocked message");
        self.get_message(id)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete an unlocked message. Reactions and replies pointing at it are
    /// left in place.
    pub fn delete_message(&self, id: Uuid) -> Result<()> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE id = ?1 AND is_locked = 0",
            params![id.to_string()],
        )?;
        if affected == 0 {
            return Err(self.classify_message_miss(id)?);
        }

        tracing::debug!(message_id = %id, "deleted message");
        Ok(())
    }

    /// Moderator delete: ignores the lock.
    pub fn admin_delete_message(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    /// Wipe the room: messages, reactions, polls and votes. Returns the
    /// number of messages removed.
    pub fn clear_messages(&self) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM messages", [])?;
        tx.execute("DELETE FROM reactions", [])?;
        tx.execute("DELETE FROM poll_votes", [])?;
        tx.execute("DELETE FROM polls", [])?;
        tx.commit()?;

        tracing::info!(removed, "cleared room messages");
        Ok(removed)
    }

    /// A guarded write touched nothing: tell "gone" from "locked".
    fn classify_message_miss(&self, id: Uuid) -> Result<StoreError> {
        let locked: Option<bool> = self
            .conn()
            .query_row(
                "SELECT is_locked FROM messages WHERE id = ?1",
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

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        content: row.get(2)?,
        image_url: row.get(3)?,
        reply_to_id: opt_uuid_col(row, 4)?,
        is_edited: row.get(5)?,
        is_locked: row.get(6)?,
        locked_by_user_id: opt_uuid_col(row, 7)?,
        timestamp: ts_col(row, 8)?,
    })
}
