/// Application name, also the default instance name
pub const APP_NAME: &str = "Huddle";

/// A user counts as active while their last heartbeat is younger than this
pub const ACTIVE_WINDOW_SECS: u64 = 60;

/// Suggested client heartbeat interval (well under half the active window)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Username length bounds, measured in characters after trimming
pub const USERNAME_MIN_LEN: usize = 2;
pub const USERNAME_MAX_LEN: usize = 20;

/// Names nobody may log in as (compared case-insensitively)
pub const RESERVED_USERNAMES: &[&str] = &[
    "admin",
    "administrator",
    "support",
    "moderator",
    "mod",
    "system",
    "bot",
    "official",
    "staff",
    "help",
    "root",
    "owner",
    "huddle",
    "team",
    "service",
    "security",
];

/// Color assigned when the client does not pick one
pub const DEFAULT_COLOR: &str = "#000000";

/// Maximum bio length in characters
pub const MAX_BIO_LEN: usize = 280;

/// Poll option count bounds
pub const POLL_MIN_OPTIONS: usize = 2;
pub const POLL_MAX_OPTIONS: usize = 6;

/// Prefix carried by the room message a poll is attached to
pub const POLL_MARKER: &str = "[POLL]";

/// Maximum uploaded file size in bytes (5 MiB)
pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024;

/// Lifetime of an uploaded file (3 hours)
pub const FILE_TTL_SECS: u64 = 3 * 60 * 60;

/// Interval of the expired-file sweep
pub const FILE_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 5000;
