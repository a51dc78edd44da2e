//! Heartbeat-based presence.
//!
//! Maintains an in-memory map of user id to the last time that user was
//! heard from. Nothing here is persisted. A user counts as active while
//! `now - last_seen < window`; records are never flipped to inactive, they
//! simply age out. Logout is the only way to leave the active set early.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use huddle_shared::UserStatus;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

/// Tracks when each user last showed signs of life.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    last_seen: HashMap<Uuid, DateTime<Utc>>,
    window: Duration,
}

impl PresenceTracker {
    /// Create an empty tracker with the given activity window.
    pub fn new(window: Duration) -> Self {
        Self {
            last_seen: HashMap::new(),
            window,
        }
    }

    /// Record activity for `user_id` at `now`.
    ///
    /// Ids the directory does not know are accepted; they are dropped when
    /// the active set is joined with the user table.
    pub fn touch(&mut self, user_id: Uuid, now: DateTime<Utc>) {
        if self.last_seen.insert(user_id, now).is_none() {
            debug!(user_id = %user_id, "Tracking presence");
        }
    }

    pub fn last_seen(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.last_seen.get(&user_id).copied()
    }

    /// Whether `user_id` was seen within the window ending at `now`.
    pub fn is_active(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        self.last_seen
            .get(&user_id)
            .is_some_and(|seen| now - *seen < self.window)
    }

    /// Ids of every user currently inside the window.
    pub fn active_ids(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.last_seen
            .iter()
            .filter(|(_, seen)| now - **seen < self.window)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Active users joined with the directory, in directory order.
    pub fn active_users(&self, db: &Database, now: DateTime<Utc>) -> Result<Vec<User>> {
        Ok(db
            .list_users()?
            .into_iter()
            .filter(|user| self.is_active(user.id, now))
            .collect())
    }

    /// Drop the record for `user_id`. Returns whether one existed.
    pub fn remove(&mut self, user_id: Uuid) -> bool {
        self.last_seen.remove(&user_id).is_some()
    }

    /// End a session: forget the user's activity and mark them offline.
    ///
    /// Takes effect immediately regardless of the window. A user missing
    /// from the directory only loses the presence record.
    pub fn logout(&mut self, db: &Database, user_id: Uuid) -> Result<Option<User>> {
        self.remove(user_id);
        match db.set_user_status(user_id, UserStatus::Offline) {
            Ok(user) => {
                debug!(user_id = %user_id, "User logged out");
                Ok(Some(user))
            }
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Forget records that fell out of the window. Housekeeping only: the
    /// active set is the same before and after.
    pub fn purge_stale(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.last_seen.len();
        let window = self.window;
        self.last_seen.retain(|_, seen| now - *seen < window);
        let purged = before - self.last_seen.len();
        if purged > 0 {
            debug!(purged, "Purged stale presence records");
        }
        purged
    }

    /// Number of tracked records, stale ones included.
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(Duration::seconds(huddle_shared::constants::ACTIVE_WINDOW_SECS as i64))
    }
}
