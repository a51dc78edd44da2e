use thiserror::Error;

/// Malformed client input, rejected before any store is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Username is required")]
    EmptyUsername,

    #[error("Username must be {min}-{max} characters long")]
    UsernameLength { min: usize, max: usize },

    #[error("Username '{0}' is reserved")]
    ReservedUsername(String),

    #[error("Invalid color '{0}', expected #RRGGBB")]
    InvalidColor(String),

    #[error("Bio must be at most {max} characters")]
    BioTooLong { max: usize },

    #[error("Message content is empty")]
    EmptyContent,

    #[error("You cannot mention yourself")]
    SelfMention,

    #[error("Emoji is required")]
    EmptyEmoji,

    #[error("Poll question is empty")]
    EmptyPollQuestion,

    #[error("Poll needs {min}-{max} non-empty options, got {got}")]
    PollOptionCount { min: usize, max: usize, got: usize },

    #[error("Option index {index} is out of range for {len} options")]
    OptionOutOfRange { index: usize, len: usize },

    #[error("Unknown user status '{0}'")]
    InvalidStatus(String),

    #[error("Unknown DM request status '{0}'")]
    InvalidDmStatus(String),

    #[error("A DM request must be answered with accepted or rejected")]
    InvalidDmResponse,

    #[error("Cannot start a direct conversation with yourself")]
    SelfDirectMessage,
}
