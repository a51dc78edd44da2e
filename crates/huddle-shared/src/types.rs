use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Self-declared availability shown next to a username.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Online,
    Away,
    Busy,
    Offline,
}

impl UserStatus {
    pub const ALL: [UserStatus; 4] = [
        UserStatus::Online,
        UserStatus::Away,
        UserStatus::Busy,
        UserStatus::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Away => "away",
            UserStatus::Busy => "busy",
            UserStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidStatus(s.to_string()))
    }
}

/// Lifecycle of a direct-message request between two users.
///
/// `Pending` is the only state with outgoing transitions; `Accepted` and
/// `Rejected` are terminal for the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl DmRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DmRequestStatus::Pending => "pending",
            DmRequestStatus::Accepted => "accepted",
            DmRequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DmRequestStatus::Pending)
    }
}

impl fmt::Display for DmRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DmRequestStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DmRequestStatus::Pending),
            "accepted" => Ok(DmRequestStatus::Accepted),
            "rejected" => Ok(DmRequestStatus::Rejected),
            other => Err(ValidationError::InvalidDmStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        for status in UserStatus::ALL {
            assert_eq!(status.as_str().parse::<UserStatus>().unwrap(), status);
        }
        assert!("Online".parse::<UserStatus>().is_err());
        assert!("invisible".parse::<UserStatus>().is_err());
    }

    #[test]
    fn test_dm_status_terminal() {
        assert!(!DmRequestStatus::Pending.is_terminal());
        assert!(DmRequestStatus::Accepted.is_terminal());
        assert!(DmRequestStatus::Rejected.is_terminal());
        assert_eq!(
            "accepted".parse::<DmRequestStatus>().unwrap(),
            DmRequestStatus::Accepted
        );
    }
}
