//! Domain model structs persisted in the chat database.
//!
//! Every struct derives `Serialize` so it can be handed straight to the HTTP
//! layer; field names go out in camelCase.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use huddle_shared::{DmRequestStatus, UserStatus};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A chat participant, created on first login by a given username.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    /// Unique, case-sensitive.
    pub username: String,
    /// `#RRGGBB` display color.
    pub color: String,
    pub bio: Option<String>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

/// Partial profile edit; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub color: Option<String>,
    /// `Some(None)` clears the bio.
    pub bio: Option<Option<String>>,
}

// ---------------------------------------------------------------------------
// Room messages
// ---------------------------------------------------------------------------

/// A message posted to the shared room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    /// Author.
    pub user_id: Uuid,
    pub content: String,
    pub image_url: Option<String>,
    /// Plain id of the message this one answers. The target may be gone.
    pub reply_to_id: Option<Uuid>,
    /// Set by the first edit and never cleared.
    pub is_edited: bool,
    pub is_locked: bool,
    pub locked_by_user_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// Input for [`Database::create_message`](crate::Database::create_message).
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub user_id: Uuid,
    pub content: String,
    pub image_url: Option<String>,
    pub reply_to_id: Option<Uuid>,
}

/// A single emoji reaction row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Reactions of one emoji on one message, in the order they were added.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionGroup {
    pub emoji: String,
    pub user_ids: Vec<Uuid>,
}

/// The message a reply points at, with its author.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    #[serde(flatten)]
    pub message: Message,
    pub user: Option<User>,
}

/// Denormalized row returned by the room listing.
///
/// Absent lookups (deleted author, deleted reply target, deleted locker)
/// simply leave the field empty.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub user: Option<User>,
    pub reply_to: Option<ReplyPreview>,
    pub reactions: Vec<ReactionGroup>,
    pub locked_by: Option<User>,
}

// ---------------------------------------------------------------------------
// Direct messaging
// ---------------------------------------------------------------------------

/// Opt-in handshake between two users. At most one exists per pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DmRequest {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub status: DmRequestStatus,
    pub timestamp: DateTime<Utc>,
}

impl DmRequest {
    /// Whether `user_id` is one of the two parties.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.from_user_id == user_id || self.to_user_id == user_id
    }

    /// The party that is not `user_id`.
    pub fn other_party(&self, user_id: Uuid) -> Uuid {
        if self.from_user_id == user_id {
            self.to_user_id
        } else {
            self.from_user_id
        }
    }
}

/// A DM request with both parties resolved.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DmRequestView {
    #[serde(flatten)]
    pub request: DmRequest,
    pub from_user: Option<User>,
    pub to_user: Option<User>,
}

/// A private message between two accepted partners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub content: String,
    pub is_edited: bool,
    pub is_pinned: bool,
    /// Flipped by the recipient's mark-as-read; never reverts.
    pub is_read: bool,
    pub is_locked: bool,
    pub locked_by_user_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Polls
// ---------------------------------------------------------------------------

/// A poll attached to a room message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: Uuid,
    pub message_id: Uuid,
    pub question: String,
    pub options: Vec<String>,
    /// Voter -> chosen option index.
    pub votes: BTreeMap<Uuid, usize>,
    pub timestamp: DateTime<Utc>,
}

/// Per-option breakdown of a poll, derived on read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    pub total_voters: usize,
    /// Indexed like `Poll::options`.
    pub counts: Vec<usize>,
    /// Rounded to the nearest integer; all zero without voters.
    pub percentages: Vec<u32>,
    /// Options sharing the highest count; empty without voters.
    pub winners: Vec<usize>,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Metadata for an ephemeral upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: Uuid,
    pub message_id: Option<Uuid>,
    /// Name of the stored file inside the upload directory.
    pub filename: String,
    /// Name the client uploaded it under.
    pub original_name: String,
    pub size: i64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
