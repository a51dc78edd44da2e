//! Caller-side input checks.
//!
//! The stores only guard data invariants (locks, uniqueness). Everything a
//! client could get wrong in its request body is rejected here, before any
//! mutation happens.

use crate::constants::{
    MAX_BIO_LEN, POLL_MAX_OPTIONS, POLL_MIN_OPTIONS, RESERVED_USERNAMES, USERNAME_MAX_LEN,
    USERNAME_MIN_LEN,
};
use crate::error::ValidationError;

/// Trim and check a requested username. Returns the trimmed form.
pub fn normalize_username(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyUsername);
    }

    let len = name.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(ValidationError::UsernameLength {
            min: USERNAME_MIN_LEN,
            max: USERNAME_MAX_LEN,
        });
    }

    let lowered = name.to_lowercase();
    if RESERVED_USERNAMES.contains(&lowered.as_str()) {
        return Err(ValidationError::ReservedUsername(name.to_string()));
    }

    Ok(name.to_string())
}

/// Accept `#RRGGBB` (either case). Returns the color unchanged.
pub fn validate_color(raw: &str) -> Result<String, ValidationError> {
    let color = raw.trim();
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(ValidationError::InvalidColor(raw.to_string()));
    }
    Ok(color.to_string())
}

/// Empty bios are stored as `None`.
pub fn normalize_bio(raw: &str) -> Result<Option<String>, ValidationError> {
    let bio = raw.trim();
    if bio.chars().count() > MAX_BIO_LEN {
        return Err(ValidationError::BioTooLong { max: MAX_BIO_LEN });
    }
    Ok((!bio.is_empty()).then(|| bio.to_string()))
}

/// A message needs text unless it carries an image.
pub fn validate_content(content: &str, has_image: bool) -> Result<(), ValidationError> {
    if content.trim().is_empty() && !has_image {
        return Err(ValidationError::EmptyContent);
    }
    Ok(())
}

pub fn normalize_emoji(raw: &str) -> Result<String, ValidationError> {
    let emoji = raw.trim();
    if emoji.is_empty() {
        return Err(ValidationError::EmptyEmoji);
    }
    Ok(emoji.to_string())
}

/// Extract `@name` mentions, where a name is a run of word characters.
pub fn mentions(content: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = content;

    while let Some(at) = rest.find('@') {
        let after = &rest[at + 1..];
        let end = after
            .char_indices()
            .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(after.len());
        if end > 0 {
            found.push(&after[..end]);
        }
        rest = &after[end..];
    }

    found
}

/// Reject content whose only mentions point at its author.
pub fn check_self_mention(content: &str, username: &str) -> Result<(), ValidationError> {
    let names = mentions(content);
    if names.is_empty() {
        return Ok(());
    }

    let is_self = |name: &&str| name.eq_ignore_ascii_case(username);
    let mentions_self = names.iter().any(is_self);
    let mentions_others = names.iter().any(|name| !is_self(name));

    if mentions_self && !mentions_others {
        return Err(ValidationError::SelfMention);
    }
    Ok(())
}

/// Trim the question and options, dropping blank options.
pub fn normalize_poll(
    question: &str,
    options: &[String],
) -> Result<(String, Vec<String>), ValidationError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ValidationError::EmptyPollQuestion);
    }

    let options: Vec<String> = options
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();

    if !(POLL_MIN_OPTIONS..=POLL_MAX_OPTIONS).contains(&options.len()) {
        return Err(ValidationError::PollOptionCount {
            min: POLL_MIN_OPTIONS,
            max: POLL_MAX_OPTIONS,
            got: options.len(),
        });
    }

    Ok((question.to_string(), options))
}

pub fn check_option_index(index: usize, len: usize) -> Result<(), ValidationError> {
    if index >= len {
        return Err(ValidationError::OptionOutOfRange { index, len });
    }
    Ok(())
}
