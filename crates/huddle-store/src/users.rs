//! User directory: identity, profile and declared status.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use huddle_shared::UserStatus;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ProfileUpdate, User};
use crate::row::{now, not_found, parsed_col, ts_col, ts_param, uuid_col};

const USER_COLUMNS: &str = "id, username, color, bio, status, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user with status `online`.
    ///
    /// Fails with [`StoreError::Conflict`] if the username is taken.
    pub fn create_user(&self, username: &str, color: &str) -> Result<User> {
        if self.get_user_by_username(username)?.is_some() {
            return Err(StoreError::Conflict(format!(
                "username '{username}' is taken"
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            color: color.to_string(),
            bio: None,
            status: UserStatus::Online,
            created_at: now(),
        };

        self.conn().execute(
            "INSERT INTO users (id, username, color, bio, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.to_string(),
                user.username,
                user.color,
                user.bio,
                user.status.as_str(),
                ts_param(&user.created_at),
            ],
        )?;

        tracing::debug!(user_id = %user.id, username = %user.username, "created user");
        Ok(user)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: Uuid) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Exact, case-sensitive lookup.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_exists(&self, id: Uuid) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All users in creation order.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn set_user_status(&self, id: Uuid, status: UserStatus) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)
    }

    /// Apply a partial profile edit. Renaming onto another user's name is a
    /// [`StoreError::Conflict`].
    pub fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<User> {
        let mut user = self.get_user(id)?;

        if let Some(username) = &update.username {
            if let Some(existing) = self.get_user_by_username(username)? {
                if existing.id != id {
                    return Err(StoreError::Conflict(format!(
                        "username '{username}' is taken"
                    )));
                }
            }
            user.username = username.clone();
        }
        if let Some(color) = &update.color {
            user.color = color.clone();
        }
        if let Some(bio) = &update.bio {
            user.bio = bio.clone();
        }

        self.conn().execute(
            "UPDATE users SET username = ?1, color = ?2, bio = ?3 WHERE id = ?4",
            params![user.username, user.color, user.bio, id.to_string()],
        )?;

        tracing::debug!(user_id = %id, "updated profile");
        Ok(user)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove a user row. Their messages stay and render without an author.
    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_col(row, 0)?,
        username: row.get(1)?,
        color: row.get(2)?,
        bio: row.get(3)?,
        status: parsed_col(row, 4)?,
        created_at: ts_col(row, 5)?,
    })
}
