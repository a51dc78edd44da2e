//! Chat policy layer.
//!
//! The stores only hold data invariants. Who may edit, lock, react to or
//! answer what is decided here, as plain precondition checks that run before
//! the store is touched. A [`Chat`] is used behind a single mutex, so every
//! method below runs its check-then-act sequence without interleaving.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use huddle_shared::constants::{DEFAULT_COLOR, POLL_MARKER};
use huddle_shared::validation::{
    check_option_index, check_self_mention, normalize_bio, normalize_emoji, normalize_poll,
    normalize_username, validate_color, validate_content,
};
use huddle_shared::{DmRequestStatus, UserStatus, ValidationError};
use huddle_store::{
    Database, DirectMessage, DmRequest, DmRequestView, FileRecord, Message, MessageView,
    NewMessage, Poll, PresenceTracker, ProfileUpdate, Reaction, StoreError, User,
};

use crate::error::ServerError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Names the missing record when a store lookup comes back empty.
trait OrNotFound<T> {
    fn or_not_found(self, what: &str) -> Result<T>;
}

impl<T> OrNotFound<T> for huddle_store::Result<T> {
    fn or_not_found(self, what: &str) -> Result<T> {
        self.map_err(|e| match e {
            StoreError::NotFound => ServerError::NotFound(what.to_string()),
            other => other.into(),
        })
    }
}

fn forbid(reason: &str) -> ServerError {
    warn!(reason, "Rejected request");
    ServerError::Forbidden(reason.to_string())
}

/// Offline users may read but not post.
fn ensure_online(user: &User) -> Result<()> {
    if user.status == UserStatus::Offline {
        return Err(forbid("You are offline"));
    }
    Ok(())
}

/// Profile fields a client may change. `None` leaves a field alone; an
/// empty bio clears it.
#[derive(Debug, Default)]
pub struct ProfileEdit<'a> {
    pub username: Option<&'a str>,
    pub color: Option<&'a str>,
    pub bio: Option<&'a str>,
}

/// What one housekeeping pass removed.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub expired_files: Vec<FileRecord>,
    pub stale_presence: usize,
}

/// The database and the presence tracker, guarded together.
pub struct Chat {
    db: Database,
    presence: PresenceTracker,
}

impl Chat {
    pub fn new(db: Database, window: Duration) -> Self {
        Self {
            db,
            presence: PresenceTracker::new(window),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // ------------------------------------------------------------------
    // Sessions and presence
    // ------------------------------------------------------------------

    /// Create or resume the user named `username`.
    ///
    /// A name whose owner is still inside the active window is refused, so
    /// two browsers cannot share one identity.
    pub fn login(&mut self, username: &str, color: Option<&str>, now: DateTime<Utc>) -> Result<User> {
        let username = normalize_username(username)?;
        let color = color.map(validate_color).transpose()?;

        let user = match self.db.get_user_by_username(&username)? {
            Some(existing) if self.presence.is_active(existing.id, now) => {
                warn!(username = %username, "Login refused, username active");
                return Err(ServerError::Conflict(format!(
                    "Username '{username}' is already in use"
                )));
            }
            Some(existing) => {
                if let Some(color) = color.filter(|c| *c != existing.color) {
                    self.db.update_profile(
                        existing.id,
                        &ProfileUpdate {
                            color: Some(color),
                            ..Default::default()
                        },
                    )?;
                }
                info!(user_id = %existing.id, username = %username, "User resumed");
                self.db.set_user_status(existing.id, UserStatus::Online)?
            }
            None => {
                let color = color.unwrap_or_else(|| DEFAULT_COLOR.to_string());
                let user = self.db.create_user(&username, &color)?;
                info!(user_id = %user.id, username = %username, "User created");
                user
            }
        };

        self.presence.touch(user.id, now);
        Ok(user)
    }

    pub fn logout(&mut self, user_id: Uuid) -> Result<()> {
        if self.presence.logout(&self.db, user_id)?.is_some() {
            info!(user_id = %user_id, "User logged out");
        }
        Ok(())
    }

    /// Refresh presence. Unknown and offline users are ignored; only a
    /// fresh login brings a logged-out user back.
    pub fn heartbeat(&mut self, user_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        match self.db.get_user(user_id) {
            Ok(user) if user.status != UserStatus::Offline => {
                self.presence.touch(user_id, now);
                Ok(())
            }
            Ok(_) | Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn active_users(&self, now: DateTime<Utc>) -> Result<Vec<User>> {
        Ok(self.presence.active_users(&self.db, now)?)
    }

    pub fn set_status(&mut self, user_id: Uuid, status: &str) -> Result<User> {
        let status: UserStatus = status.parse()?;
        self.db.set_user_status(user_id, status).or_not_found("User")
    }

    pub fn update_profile(&mut self, user_id: Uuid, edit: ProfileEdit<'_>) -> Result<User> {
        let update = ProfileUpdate {
            username: edit.username.map(normalize_username).transpose()?,
            color: edit.color.map(validate_color).transpose()?,
            bio: edit.bio.map(normalize_bio).transpose()?,
        };
        self.db.update_profile(user_id, &update).or_not_found("User")
    }

    // ------------------------------------------------------------------
    // Room messages
    // ------------------------------------------------------------------

    pub fn messages(&self) -> Result<Vec<MessageView>> {
        Ok(self.db.list_message_views()?)
    }

    pub fn send_message(
        &mut self,
        user_id: Uuid,
        content: &str,
        image_url: Option<String>,
        reply_to_id: Option<Uuid>,
    ) -> Result<Message> {
        let image_url = image_url.filter(|url| !url.trim().is_empty());
        validate_content(content, image_url.is_some())?;

        let author = self.db.get_user(user_id).or_not_found("User")?;
        ensure_online(&author)?;
        check_self_mention(content, &author.username)?;

        if let Some(target) = reply_to_id {
            self.db.get_message(target).or_not_found("Reply target")?;
        }

        Ok(self.db.create_message(&NewMessage {
            user_id,
            content: content.to_string(),
            image_url,
            reply_to_id,
        })?)
    }

    /// Edit as `actor`; when given, the actor must be the author.
    pub fn edit_message(&mut self, id: Uuid, actor: Option<Uuid>, content: &str) -> Result<Message> {
        let message = self.db.get_message(id).or_not_found("Message")?;
        validate_content(content, message.image_url.is_some())?;
        if actor.is_some_and(|actor| actor != message.user_id) {
            return Err(forbid("Only the author can edit this message"));
        }

        let author = self.db.get_user(message.user_id).or_not_found("User")?;
        ensure_online(&author)?;
        check_self_mention(content, &author.username)?;

        self.db.edit_message(id, content).or_not_found("Message")
    }

    pub fn delete_message(&mut self, id: Uuid, actor: Option<Uuid>) -> Result<()> {
        let message = self.db.get_message(id).or_not_found("Message")?;
        if actor.is_some_and(|actor| actor != message.user_id) {
            return Err(forbid("Only the author can delete this message"));
        }
        self.db.delete_message(id).or_not_found("Message")
    }

    /// Lock someone else's message.
    pub fn lock_message(&mut self, id: Uuid, by_user_id: Uuid) -> Result<Message> {
        let message = self.db.get_message(id).or_not_found("Message")?;
        if message.user_id == by_user_id {
            return Err(forbid("You cannot lock your own message"));
        }
        if !self.db.user_exists(by_user_id)? {
            return Err(ServerError::NotFound("User".into()));
        }
        self.db.lock_message(id, by_user_id).or_not_found("Message")
    }

    /// Unlock; when an actor is given, only the locker may do it.
    pub fn unlock_message(&mut self, id: Uuid, actor: Option<Uuid>) -> Result<Message> {
        let message = self.db.get_message(id).or_not_found("Message")?;
        if message.is_locked
            && actor.is_some_and(|actor| message.locked_by_user_id != Some(actor))
        {
            return Err(forbid("Only the user who locked this message can unlock it"));
        }
        self.db.unlock_message(id).or_not_found("Message")
    }

    pub fn add_reaction(&mut self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<Reaction> {
        let emoji = normalize_emoji(emoji)?;
        let message = self.db.get_message(message_id).or_not_found("Message")?;
        if message.user_id == user_id {
            return Err(forbid("You cannot react to your own message"));
        }
        if !self.db.user_exists(user_id)? {
            return Err(ServerError::NotFound("User".into()));
        }
        Ok(self.db.add_reaction(message_id, user_id, &emoji)?)
    }

    /// `false` when there was nothing to remove.
    pub fn remove_reaction(&mut self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<bool> {
        let emoji = normalize_emoji(emoji)?;
        Ok(self.db.remove_reaction(message_id, user_id, &emoji)?)
    }

    // ------------------------------------------------------------------
    // DM handshake
    // ------------------------------------------------------------------

    /// Returns the request for the pair and whether it was just created.
    pub fn request_dm(&mut self, from: Uuid, to: Uuid) -> Result<(DmRequest, bool)> {
        if from == to {
            return Err(ValidationError::SelfDirectMessage.into());
        }
        self.require_user(from)?;
        self.require_user(to)?;
        Ok(self.db.request_dm(from, to)?)
    }

    /// Answer a pending request. When an actor is given it must be the
    /// recipient.
    pub fn respond_dm(&mut self, id: Uuid, status: &str, actor: Option<Uuid>) -> Result<DmRequest> {
        let status: DmRequestStatus = status.parse()?;
        if !status.is_terminal() {
            return Err(ValidationError::InvalidDmResponse.into());
        }

        let request = self.db.get_dm_request(id).or_not_found("DM request")?;
        if actor.is_some_and(|actor| actor != request.to_user_id) {
            return Err(forbid("Only the recipient can answer a DM request"));
        }
        self.db.respond_dm_request(id, status).or_not_found("DM request")
    }

    pub fn dm_requests(&self, user_id: Uuid) -> Result<Vec<DmRequestView>> {
        Ok(self.db.dm_requests_for_user(user_id)?)
    }

    pub fn dm_partners(&self, user_id: Uuid) -> Result<Vec<User>> {
        Ok(self.db.dm_partners(user_id)?)
    }

    // ------------------------------------------------------------------
    // DM conversation
    // ------------------------------------------------------------------

    pub fn dm_thread(&self, a: Uuid, b: Uuid) -> Result<Vec<DirectMessage>> {
        Ok(self.db.direct_thread(a, b)?)
    }

    pub fn pinned_dms(&self, a: Uuid, b: Uuid) -> Result<Vec<DirectMessage>> {
        Ok(self.db.pinned_direct_messages(a, b)?)
    }

    /// Send within an accepted handshake only.
    pub fn send_dm(&mut self, from: Uuid, to: Uuid, content: &str) -> Result<DirectMessage> {
        validate_content(content, false)?;
        if from == to {
            return Err(ValidationError::SelfDirectMessage.into());
        }
        if !self.db.are_dm_partners(from, to)? {
            return Err(forbid("Direct messages need an accepted request"));
        }
        Ok(self.db.send_direct_message(from, to, content)?)
    }

    pub fn edit_dm(&mut self, id: Uuid, actor: Option<Uuid>, content: &str) -> Result<DirectMessage> {
        validate_content(content, false)?;
        let dm = self.db.get_direct_message(id).or_not_found("Direct message")?;
        if actor.is_some_and(|actor| actor != dm.from_user_id) {
            return Err(forbid("Only the sender can edit this message"));
        }
        self.db.edit_direct_message(id, content).or_not_found("Direct message")
    }

    pub fn delete_dm(&mut self, id: Uuid, actor: Option<Uuid>) -> Result<()> {
        let dm = self.db.get_direct_message(id).or_not_found("Direct message")?;
        if actor.is_some_and(|actor| actor != dm.from_user_id) {
            return Err(forbid("Only the sender can delete this message"));
        }
        self.db.delete_direct_message(id).or_not_found("Direct message")
    }

    /// Only the recipient locks a direct message.
    pub fn lock_dm(&mut self, id: Uuid, by_user_id: Uuid) -> Result<DirectMessage> {
        let dm = self.db.get_direct_message(id).or_not_found("Direct message")?;
        if dm.to_user_id != by_user_id {
            return Err(forbid("Only the recipient can lock this message"));
        }
        self.db.lock_direct_message(id, by_user_id).or_not_found("Direct message")
    }

    pub fn unlock_dm(&mut self, id: Uuid, actor: Option<Uuid>) -> Result<DirectMessage> {
        let dm = self.db.get_direct_message(id).or_not_found("Direct message")?;
        if dm.is_locked && actor.is_some_and(|actor| dm.locked_by_user_id != Some(actor)) {
            return Err(forbid("Only the user who locked this message can unlock it"));
        }
        self.db.unlock_direct_message(id).or_not_found("Direct message")
    }

    pub fn pin_dm(&mut self, id: Uuid, actor: Option<Uuid>, pinned: bool) -> Result<DirectMessage> {
        let dm = self.db.get_direct_message(id).or_not_found("Direct message")?;
        if actor.is_some_and(|actor| actor != dm.from_user_id && actor != dm.to_user_id) {
            return Err(forbid("Only the two participants can pin this message"));
        }
        self.db
            .set_direct_message_pinned(id, pinned)
            .or_not_found("Direct message")
    }

    /// Mark what `from` sent to `to` as read.
    pub fn mark_dms_read(&mut self, from: Uuid, to: Uuid) -> Result<usize> {
        Ok(self.db.mark_direct_messages_read(from, to)?)
    }

    pub fn unread_dm_count(&self, user_id: Uuid, from: Uuid) -> Result<usize> {
        Ok(self.db.unread_direct_count(user_id, from)?)
    }

    // ------------------------------------------------------------------
    // Polls
    // ------------------------------------------------------------------

    /// Attach a poll to an existing room message.
    pub fn create_poll(&mut self, message_id: Uuid, question: &str, options: &[String]) -> Result<Poll> {
        let (question, options) = normalize_poll(question, options)?;
        self.db.get_message(message_id).or_not_found("Message")?;
        Ok(self.db.create_poll(message_id, &question, &options)?)
    }

    /// Post the marker message for a new poll and attach the poll to it.
    pub fn start_poll(&mut self, user_id: Uuid, question: &str, options: &[String]) -> Result<(Message, Poll)> {
        let (question, options) = normalize_poll(question, options)?;
        let author = self.db.get_user(user_id).or_not_found("User")?;
        ensure_online(&author)?;

        let message = self.db.create_message(&NewMessage {
            user_id,
            content: format!("{POLL_MARKER} {question}"),
            ..Default::default()
        })?;
        let poll = self.db.create_poll(message.id, &question, &options)?;
        Ok((message, poll))
    }

    pub fn poll_for_message(&self, message_id: Uuid) -> Result<Poll> {
        self.db
            .poll_for_message(message_id)?
            .ok_or_else(|| ServerError::NotFound("Poll".into()))
    }

    /// Cast or change a vote. The last vote of a user wins.
    pub fn vote(&mut self, poll_id: Uuid, option_index: usize, user_id: Uuid) -> Result<Poll> {
        let poll = self.db.get_poll(poll_id).or_not_found("Poll")?;
        check_option_index(option_index, poll.options.len())?;
        self.require_user(user_id)?;
        self.db.vote(poll_id, option_index, user_id).or_not_found("Poll")
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    pub fn record_file(&mut self, record: &FileRecord) -> Result<()> {
        if let Some(message_id) = record.message_id {
            self.db.get_message(message_id).or_not_found("Message")?;
        }
        Ok(self.db.insert_file(record)?)
    }

    /// A file that exists and has not expired yet.
    pub fn live_file(&self, id: Uuid, now: DateTime<Utc>) -> Result<FileRecord> {
        let record = self.db.get_file(id).or_not_found("File")?;
        if record.is_expired(now) {
            return Err(ServerError::NotFound("File".into()));
        }
        Ok(record)
    }

    /// Drop expired file records and stale presence entries.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Result<SweepReport> {
        Ok(SweepReport {
            expired_files: self.db.delete_expired_files(now)?,
            stale_presence: self.presence.purge_stale(now),
        })
    }

    // ------------------------------------------------------------------
    // Admin
    // ------------------------------------------------------------------

    pub fn all_users(&self) -> Result<Vec<User>> {
        Ok(self.db.list_users()?)
    }

    pub fn admin_delete_user(&mut self, id: Uuid) -> Result<bool> {
        self.presence.remove(id);
        let deleted = self.db.delete_user(id)?;
        if deleted {
            info!(user_id = %id, "Admin deleted user");
        }
        Ok(deleted)
    }

    pub fn all_messages(&self) -> Result<Vec<Message>> {
        Ok(self.db.list_messages()?)
    }

    /// Delete regardless of the lock.
    pub fn admin_delete_message(&mut self, id: Uuid) -> Result<bool> {
        let deleted = self.db.admin_delete_message(id)?;
        if deleted {
            info!(message_id = %id, "Admin deleted message");
        }
        Ok(deleted)
    }

    pub fn clear_messages(&mut self) -> Result<usize> {
        Ok(self.db.clear_messages()?)
    }

    fn require_user(&self, id: Uuid) -> Result<()> {
        if !self.db.user_exists(id)? {
            return Err(ServerError::NotFound("User".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat() -> Chat {
        Chat::new(Database::open_in_memory().unwrap(), Duration::seconds(60))
    }

    fn users(chat: &mut Chat, now: DateTime<Utc>) -> (User, User) {
        let alice = chat.login("alice", Some("#ff0000"), now).unwrap();
        let bob = chat.login("bob", Some("#0000ff"), now).unwrap();
        (alice, bob)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn login_conflicts_while_active() {
        let mut chat = chat();
        let t0 = Utc::now();
        let alice = chat.login("  alice ", None, t0).unwrap();
        assert_eq!(alice.username, "alice");
        assert_eq!(alice.color, DEFAULT_COLOR);

        assert!(matches!(
            chat.login("alice", None, t0 + Duration::seconds(30)),
            Err(ServerError::Conflict(_))
        ));

        // Once the window lapses the same user is resumed.
        let resumed = chat
            .login("alice", Some("#00ff00"), t0 + Duration::seconds(61))
            .unwrap();
        assert_eq!(resumed.id, alice.id);
        assert_eq!(resumed.color, "#00ff00");
        assert_eq!(resumed.status, UserStatus::Online);
    }

    #[test]
    fn login_validation() {
        let mut chat = chat();
        let now = Utc::now();
        assert!(matches!(chat.login("a", None, now), Err(ServerError::Validation(_))));
        assert!(matches!(chat.login("Admin", None, now), Err(ServerError::Validation(_))));
        assert!(matches!(
            chat.login("alice", Some("red"), now),
            Err(ServerError::Validation(_))
        ));
    }

    #[test]
    fn logout_frees_the_name_immediately() {
        let mut chat = chat();
        let now = Utc::now();
        let alice = chat.login("alice", None, now).unwrap();
        assert_eq!(chat.active_users(now).unwrap().len(), 1);

        chat.logout(alice.id).unwrap();
        assert!(chat.active_users(now).unwrap().is_empty());
        assert_eq!(chat.db().get_user(alice.id).unwrap().status, UserStatus::Offline);

        let again = chat.login("alice", None, now).unwrap();
        assert_eq!(again.id, alice.id);
    }

    #[test]
    fn heartbeat_keeps_user_active() {
        let mut chat = chat();
        let t0 = Utc::now();
        let alice = chat.login("alice", None, t0).unwrap();

        chat.heartbeat(alice.id, t0 + Duration::seconds(45)).unwrap();
        let active = chat.active_users(t0 + Duration::seconds(90)).unwrap();
        assert_eq!(active.len(), 1);
        assert!(chat.active_users(t0 + Duration::seconds(106)).unwrap().is_empty());

        // Unknown ids are a no-op.
        chat.heartbeat(Uuid::new_v4(), t0).unwrap();
    }

    #[test]
    fn heartbeat_after_logout_stays_offline() {
        let mut chat = chat();
        let t0 = Utc::now();
        let alice = chat.login("alice", None, t0).unwrap();
        chat.logout(alice.id).unwrap();

        let later = t0 + Duration::seconds(5);
        chat.heartbeat(alice.id, later).unwrap();
        assert!(chat.active_users(later).unwrap().is_empty());
        assert_eq!(chat.db().get_user(alice.id).unwrap().status, UserStatus::Offline);

        chat.login("alice", None, later).unwrap();
        chat.heartbeat(alice.id, later).unwrap();
        assert_eq!(chat.active_users(later).unwrap().len(), 1);
    }

    #[test]
    fn status_and_profile() {
        let mut chat = chat();
        let (alice, bob) = users(&mut chat, Utc::now());

        assert_eq!(chat.set_status(alice.id, "busy").unwrap().status, UserStatus::Busy);
        assert!(matches!(
            chat.set_status(alice.id, "sleeping"),
            Err(ServerError::Validation(_))
        ));

        let edited = chat
            .update_profile(
                alice.id,
                ProfileEdit {
                    bio: Some("hi there"),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(edited.bio.as_deref(), Some("hi there"));

        assert!(matches!(
            chat.update_profile(
                alice.id,
                ProfileEdit {
                    username: Some(bob.username.as_str()),
                    ..Default::default()
                },
            ),
            Err(ServerError::Conflict(_))
        ));
    }

    #[test]
    fn send_message_rules() {
        let mut chat = chat();
        let (alice, bob) = users(&mut chat, Utc::now());

        assert!(matches!(
            chat.send_message(alice.id, "   ", None, None),
            Err(ServerError::Validation(ValidationError::EmptyContent))
        ));
        assert!(chat
            .send_message(alice.id, "", Some("/api/files/x".into()), None)
            .is_ok());
        assert!(matches!(
            chat.send_message(alice.id, "hey @alice", None, None),
            Err(ServerError::Validation(ValidationError::SelfMention))
        ));
        assert!(chat.send_message(alice.id, "hey @alice @bob", None, None).is_ok());

        assert!(matches!(
            chat.send_message(bob.id, "reply", None, Some(Uuid::new_v4())),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn edit_rejects_self_mention() {
        let mut chat = chat();
        let (alice, _bob) = users(&mut chat, Utc::now());
        let m = chat.send_message(alice.id, "hello", None, None).unwrap();

        assert!(matches!(
            chat.edit_message(m.id, Some(alice.id), "hey @alice"),
            Err(ServerError::Validation(ValidationError::SelfMention))
        ));
        assert_eq!(chat.db().get_message(m.id).unwrap().content, "hello");

        let edited = chat.edit_message(m.id, Some(alice.id), "hey @alice @bob").unwrap();
        assert_eq!(edited.content, "hey @alice @bob");
    }

    #[test]
    fn offline_users_cannot_post() {
        let mut chat = chat();
        let (alice, _bob) = users(&mut chat, Utc::now());
        let m = chat.send_message(alice.id, "hello", None, None).unwrap();

        chat.logout(alice.id).unwrap();
        assert!(matches!(
            chat.send_message(alice.id, "still here", None, None),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            chat.edit_message(m.id, Some(alice.id), "changed"),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            chat.start_poll(alice.id, "Lunch?", &["Yes".into(), "No".into()]),
            Err(ServerError::Forbidden(_))
        ));

        chat.login("alice", None, Utc::now()).unwrap();
        assert!(chat.send_message(alice.id, "back", None, None).is_ok());
    }

    #[test]
    fn lock_edit_unlock_edit() {
        let mut chat = chat();
        let (alice, bob) = users(&mut chat, Utc::now());
        let m = chat.send_message(alice.id, "original", None, None).unwrap();

        assert!(matches!(
            chat.lock_message(m.id, alice.id),
            Err(ServerError::Forbidden(_))
        ));
        let locked = chat.lock_message(m.id, bob.id).unwrap();
        assert_eq!(locked.locked_by_user_id, Some(bob.id));

        assert!(matches!(
            chat.edit_message(m.id, Some(alice.id), "changed"),
            Err(ServerError::Locked)
        ));
        assert!(matches!(
            chat.delete_message(m.id, Some(alice.id)),
            Err(ServerError::Locked)
        ));
        assert!(matches!(
            chat.unlock_message(m.id, Some(alice.id)),
            Err(ServerError::Forbidden(_))
        ));

        chat.unlock_message(m.id, Some(bob.id)).unwrap();
        let edited = chat.edit_message(m.id, Some(alice.id), "changed").unwrap();
        assert!(edited.is_edited);
        assert_eq!(edited.content, "changed");
    }

    #[test]
    fn only_author_edits_and_deletes() {
        let mut chat = chat();
        let (alice, bob) = users(&mut chat, Utc::now());
        let m = chat.send_message(alice.id, "mine", None, None).unwrap();

        assert!(matches!(
            chat.edit_message(m.id, Some(bob.id), "theirs"),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            chat.delete_message(m.id, Some(bob.id)),
            Err(ServerError::Forbidden(_))
        ));
        chat.delete_message(m.id, Some(alice.id)).unwrap();
        assert!(matches!(
            chat.delete_message(m.id, None),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn reactions_listed_with_message() {
        let mut chat = chat();
        let (alice, bob) = users(&mut chat, Utc::now());
        let m = chat.send_message(alice.id, "hello", None, None).unwrap();

        assert!(matches!(
            chat.add_reaction(m.id, alice.id, "👍"),
            Err(ServerError::Forbidden(_))
        ));
        chat.add_reaction(m.id, bob.id, "👍").unwrap();
        chat.add_reaction(m.id, bob.id, "👍").unwrap();

        let views = chat.messages().unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].reactions.len(), 1);
        assert_eq!(views[0].reactions[0].emoji, "👍");
        assert_eq!(views[0].reactions[0].user_ids, vec![bob.id]);
        assert_eq!(views[0].user.as_ref().unwrap().id, alice.id);

        assert!(chat.remove_reaction(m.id, bob.id, "👍").unwrap());
        assert!(!chat.remove_reaction(m.id, bob.id, "👍").unwrap());
    }

    #[test]
    fn dm_handshake_gates_conversation() {
        let mut chat = chat();
        let (alice, bob) = users(&mut chat, Utc::now());

        assert!(matches!(
            chat.request_dm(alice.id, alice.id),
            Err(ServerError::Validation(ValidationError::SelfDirectMessage))
        ));

        let (request, created) = chat.request_dm(alice.id, bob.id).unwrap();
        assert!(created);
        let (same, created) = chat.request_dm(bob.id, alice.id).unwrap();
        assert!(!created);
        assert_eq!(same.id, request.id);

        assert!(matches!(
            chat.send_dm(alice.id, bob.id, "hi"),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            chat.respond_dm(request.id, "accepted", Some(alice.id)),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            chat.respond_dm(request.id, "pending", Some(bob.id)),
            Err(ServerError::Validation(ValidationError::InvalidDmResponse))
        ));

        let accepted = chat.respond_dm(request.id, "accepted", Some(bob.id)).unwrap();
        assert_eq!(accepted.status, DmRequestStatus::Accepted);
        assert!(matches!(
            chat.respond_dm(request.id, "rejected", Some(bob.id)),
            Err(ServerError::Conflict(_))
        ));

        let partners: Vec<Uuid> = chat.dm_partners(alice.id).unwrap().iter().map(|u| u.id).collect();
        assert_eq!(partners, vec![bob.id]);

        let dm = chat.send_dm(alice.id, bob.id, "hi").unwrap();
        assert_eq!(chat.unread_dm_count(bob.id, alice.id).unwrap(), 1);
        assert_eq!(chat.mark_dms_read(alice.id, bob.id).unwrap(), 1);
        assert_eq!(chat.unread_dm_count(bob.id, alice.id).unwrap(), 0);
        assert_eq!(chat.dm_thread(bob.id, alice.id).unwrap()[0].id, dm.id);
    }

    #[test]
    fn dm_lock_and_pin_rules() {
        let mut chat = chat();
        let (alice, bob) = users(&mut chat, Utc::now());
        let carol = chat.login("carol", None, Utc::now()).unwrap();
        let (request, _) = chat.request_dm(alice.id, bob.id).unwrap();
        chat.respond_dm(request.id, "accepted", None).unwrap();
        let dm = chat.send_dm(alice.id, bob.id, "hello").unwrap();

        assert!(matches!(chat.lock_dm(dm.id, alice.id), Err(ServerError::Forbidden(_))));
        chat.lock_dm(dm.id, bob.id).unwrap();
        assert!(matches!(
            chat.edit_dm(dm.id, Some(alice.id), "edited"),
            Err(ServerError::Locked)
        ));
        assert!(matches!(
            chat.edit_dm(dm.id, Some(bob.id), "edited"),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            chat.unlock_dm(dm.id, Some(alice.id)),
            Err(ServerError::Forbidden(_))
        ));

        let pinned = chat.pin_dm(dm.id, Some(alice.id), true).unwrap();
        assert!(pinned.is_pinned && pinned.is_locked);
        assert!(matches!(
            chat.pin_dm(dm.id, Some(carol.id), false),
            Err(ServerError::Forbidden(_))
        ));
        assert_eq!(chat.pinned_dms(bob.id, alice.id).unwrap().len(), 1);

        chat.unlock_dm(dm.id, Some(bob.id)).unwrap();
        assert!(chat.edit_dm(dm.id, Some(alice.id), "edited").unwrap().is_edited);
        chat.delete_dm(dm.id, Some(alice.id)).unwrap();
        assert!(chat.dm_thread(alice.id, bob.id).unwrap().is_empty());
    }

    #[test]
    fn poll_lifecycle() {
        let mut chat = chat();
        let (alice, bob) = users(&mut chat, Utc::now());
        let carol = chat.login("carol", None, Utc::now()).unwrap();

        assert!(matches!(
            chat.start_poll(alice.id, "Lunch?", &strings(&["Pizza", "  "])),
            Err(ServerError::Validation(ValidationError::PollOptionCount { got: 1, .. }))
        ));

        let (message, poll) = chat
            .start_poll(alice.id, " Lunch? ", &strings(&["Pizza", "Sushi"]))
            .unwrap();
        assert_eq!(message.content, "[POLL] Lunch?");
        assert_eq!(poll.question, "Lunch?");

        chat.vote(poll.id, 0, alice.id).unwrap();
        chat.vote(poll.id, 1, bob.id).unwrap();
        let poll = chat.vote(poll.id, 0, carol.id).unwrap();
        assert_eq!(poll.results().percentages, vec![67, 33]);

        assert!(matches!(
            chat.vote(poll.id, 2, bob.id),
            Err(ServerError::Validation(ValidationError::OptionOutOfRange { .. }))
        ));
        assert!(matches!(
            chat.vote(poll.id, 0, Uuid::new_v4()),
            Err(ServerError::NotFound(_))
        ));

        let loaded = chat.poll_for_message(message.id).unwrap();
        assert_eq!(loaded.total_voters(), 3);
        assert!(matches!(
            chat.create_poll(message.id, "Again?", &strings(&["a", "b"])),
            Err(ServerError::Conflict(_))
        ));
        assert!(matches!(
            chat.create_poll(Uuid::new_v4(), "Nowhere?", &strings(&["a", "b"])),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn sweep_drops_expired_files_and_stale_presence() {
        let mut chat = chat();
        let now = Utc::now();
        chat.login("alice", None, now - Duration::minutes(5)).unwrap();
        chat.login("bob", None, now).unwrap();

        let record = |uploaded_at: DateTime<Utc>| {
            let id = Uuid::new_v4();
            FileRecord {
                id,
                message_id: None,
                filename: id.to_string(),
                original_name: "a.txt".into(),
                size: 1,
                mime_type: "text/plain".into(),
                uploaded_at,
                expires_at: uploaded_at + Duration::hours(3),
            }
        };
        let old = record(now - Duration::hours(4));
        let fresh = record(now);
        chat.record_file(&old).unwrap();
        chat.record_file(&fresh).unwrap();

        assert!(matches!(chat.live_file(old.id, now), Err(ServerError::NotFound(_))));
        assert!(chat.live_file(fresh.id, now).is_ok());

        let report = chat.sweep(now).unwrap();
        assert_eq!(report.expired_files.len(), 1);
        assert_eq!(report.expired_files[0].id, old.id);
        assert_eq!(report.stale_presence, 1);
        assert_eq!(chat.active_users(now).unwrap().len(), 1);
    }

    #[test]
    fn admin_delete_bypasses_lock() {
        let mut chat = chat();
        let (alice, bob) = users(&mut chat, Utc::now());
        let m = chat.send_message(alice.id, "locked away", None, None).unwrap();
        chat.lock_message(m.id, bob.id).unwrap();

        assert!(chat.admin_delete_message(m.id).unwrap());
        assert!(!chat.admin_delete_message(m.id).unwrap());
        assert!(chat.all_messages().unwrap().is_empty());

        chat.send_message(alice.id, "one", None, None).unwrap();
        chat.send_message(bob.id, "two", None, None).unwrap();
        assert_eq!(chat.clear_messages().unwrap(), 2);

        assert!(chat.admin_delete_user(bob.id).unwrap());
        assert_eq!(chat.all_users().unwrap().len(), 1);
    }
}
