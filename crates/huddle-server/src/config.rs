//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server starts with zero configuration
//! for local development: in-memory database, uploads under `./uploads`.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use huddle_shared::constants::{
    ACTIVE_WINDOW_SECS, APP_NAME, DEFAULT_HTTP_PORT, FILE_SWEEP_INTERVAL_SECS, FILE_TTL_SECS,
    HEARTBEAT_INTERVAL_SECS, MAX_FILE_SIZE,
};

/// Longest accepted duration setting (one year).
const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Shortest active window that still leaves a whole-second heartbeat under
/// half of it.
const MIN_ACTIVE_WINDOW_SECS: u64 = 3;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite file. Unset keeps everything in memory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Directory holding uploaded file bytes.
    /// Env: `UPLOAD_DIR`
    /// Default: `./uploads`
    pub upload_dir: PathBuf,

    /// Env: `MAX_UPLOAD_SIZE` (bytes)
    pub max_upload_size: usize,

    /// How long an upload stays downloadable.
    /// Env: `FILE_TTL_SECS`
    pub file_ttl: Duration,

    /// Presence window.
    /// Env: `ACTIVE_WINDOW_SECS`
    pub active_window: Duration,

    /// Heartbeat interval advertised to clients. Always under half the
    /// active window.
    /// Env: `HEARTBEAT_INTERVAL_SECS`
    pub heartbeat_interval: Duration,

    /// Period of the expired-file and stale-presence sweep.
    /// Env: `SWEEP_INTERVAL_SECS`
    pub sweep_interval: Duration,

    /// Admin API bearer token. Required to access /api/admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Env: `INSTANCE_NAME`
    pub instance_name: String,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("upload_dir", &self.upload_dir)
            .field("max_upload_size", &self.max_upload_size)
            .field("file_ttl", &self.file_ttl)
            .field("active_window", &self.active_window)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("sweep_interval", &self.sweep_interval)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            upload_dir: PathBuf::from("./uploads"),
            max_upload_size: MAX_FILE_SIZE,
            file_ttl: Duration::from_secs(FILE_TTL_SECS),
            active_window: Duration::from_secs(ACTIVE_WINDOW_SECS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            sweep_interval: Duration::from_secs(FILE_SWEEP_INTERVAL_SECS),
            admin_token: None,
            instance_name: APP_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            if let Some(parsed) = parse_or_warn::<SocketAddr>("HTTP_ADDR", &addr) {
                config.http_addr = parsed;
            }
        }

        if let Some(path) = get("DATABASE_PATH") {
            if !path.is_empty() && path != ":memory:" {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(dir) = get("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }

        if let Some(val) = get("MAX_UPLOAD_SIZE") {
            if let Some(n) = parse_or_warn::<usize>("MAX_UPLOAD_SIZE", &val) {
                config.max_upload_size = n;
            }
        }

        for (key, slot) in [
            ("FILE_TTL_SECS", &mut config.file_ttl),
            ("ACTIVE_WINDOW_SECS", &mut config.active_window),
            ("HEARTBEAT_INTERVAL_SECS", &mut config.heartbeat_interval),
            ("SWEEP_INTERVAL_SECS", &mut config.sweep_interval),
        ] {
            if let Some(val) = get(key) {
                match parse_or_warn::<u64>(key, &val) {
                    Some(0) => tracing::warn!(key, "Zero is not a valid duration, using default"),
                    Some(secs) if secs > MAX_DURATION_SECS => tracing::warn!(
                        key,
                        secs,
                        max = MAX_DURATION_SECS,
                        "Duration too long, using default"
                    ),
                    Some(secs) => *slot = Duration::from_secs(secs),
                    None => {}
                }
            }
        }

        if config.active_window < Duration::from_secs(MIN_ACTIVE_WINDOW_SECS) {
            tracing::warn!(
                window_secs = config.active_window.as_secs(),
                min = MIN_ACTIVE_WINDOW_SECS,
                "Active window too short, using default"
            );
            config.active_window = Duration::from_secs(ACTIVE_WINDOW_SECS);
        }

        if let Some(token) = get("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(name) = get("INSTANCE_NAME") {
            config.instance_name = name;
        }

        config.clamp_heartbeat();
        config
    }

    /// Keep the heartbeat safely under half the window so client jitter
    /// cannot make an active user flicker offline.
    fn clamp_heartbeat(&mut self) {
        let limit = self.active_window / 2;
        if self.heartbeat_interval >= limit {
            let clamped = (limit / 2).max(Duration::from_secs(1));
            tracing::warn!(
                heartbeat_secs = self.heartbeat_interval.as_secs(),
                window_secs = self.active_window.as_secs(),
                clamped_secs = clamped.as_secs(),
                "Heartbeat interval must be under half the active window, clamping"
            );
            self.heartbeat_interval = clamped;
        }
    }
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value, "Invalid value, using default");
            None
        }
    }
}
