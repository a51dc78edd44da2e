//! # huddle-store
//!
//! State for the Huddle chat server.
//!
//! Persistent records (users, room messages, reactions, DM requests, direct
//! messages, polls, file records) live in SQLite behind a synchronous
//! [`Database`] handle; each repository is an `impl Database` block in its
//! own module. Presence is process-local and lives in [`PresenceTracker`].
//!
//! The store enforces data invariants only: locks block edits and deletes,
//! one DM request per pair, one reaction per (message, user, emoji), one vote
//! per user per poll. Who may do what is decided by the caller.

pub mod database;
pub mod direct_messages;
pub mod dm_requests;
pub mod files;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod polls;
pub mod presence;
pub mod reactions;
pub mod users;

mod error;
mod row;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use presence::PresenceTracker;
