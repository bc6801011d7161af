//! Character and account name rules.

use std::collections::HashSet;

/// Name validation errors with helpful messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("Name is too short (minimum {min} characters)")]
    TooShort { min: usize },

    #[error("Name is too long (maximum {max} characters)")]
    TooLong { max: usize },

    #[error("Name cannot start or end with whitespace or punctuation")]
    InvalidEdge,

    #[error("Name contains repeated separators")]
    RepeatedSeparator,

    #[error("Name contains invalid characters: {chars}")]
    InvalidCharacters { chars: String },

    #[error("Name is reserved")]
    Reserved,
}

/// Name validation rules configuration
#[derive(Debug, Clone)]
pub struct NameRules {
    pub min_length: usize,
    pub max_length: usize,
    pub allow_spaces: bool,
    pub allow_digits: bool,
    /// Apostrophes and hyphens inside a name ("Mal'Ganis", "Anne-Marie").
    pub allow_punctuation: bool,
}

impl NameRules {
    /// Rules for in-game character names: letters, single spaces, apostrophes, hyphens.
    pub fn character() -> Self {
        NameRules {
            min_length: 2,
            max_length: 29,
            allow_spaces: true,
            allow_digits: false,
            allow_punctuation: true,
        }
    }

    /// Rules for account (login) names: ASCII letters and digits only.
    pub fn account() -> Self {
        NameRules {
            min_length: 3,
            max_length: 32,
            allow_spaces: false,
            allow_digits: true,
            allow_punctuation: false,
        }
    }
}

fn reserved_names() -> HashSet<&'static str> {
    [
        "admin", "administrator", "root", "system", "server", "gm", "god", "tutor",
        "gamemaster", "community manager", "account manager", "support", "staff",
    ]
    .iter()
    .copied()
    .collect()
}

fn is_separator(ch: char) -> bool {
    matches!(ch, ' ' | '\'' | '-')
}

/// Validate a name according to the given rules. Returns the trimmed name.
pub fn validate_name(name: &str, rules: &NameRules) -> Result<String, NameError> {
    let trimmed = name.trim();
    let length = trimmed.chars().count();

    if length < rules.min_length {
        return Err(NameError::TooShort {
            min: rules.min_length,
        });
    }
    if length > rules.max_length {
        return Err(NameError::TooLong {
            max: rules.max_length,
        });
    }

    let mut invalid: Vec<char> = trimmed
        .chars()
        .filter(|&ch| {
            let valid = if ch.is_ascii_alphabetic() {
                true
            } else if ch.is_ascii_digit() {
                rules.allow_digits
            } else if ch == ' ' {
                rules.allow_spaces
            } else if ch == '\'' || ch == '-' {
                rules.allow_punctuation
            } else {
                false
            };
            !valid
        })
        .collect();
    if !invalid.is_empty() {
        invalid.sort_unstable();
        invalid.dedup();
        return Err(NameError::InvalidCharacters {
            chars: invalid.into_iter().collect(),
        });
    }

    let first = trimmed.chars().next();
    let last = trimmed.chars().last();
    if first.map(is_separator).unwrap_or(false) || last.map(is_separator).unwrap_or(false) {
        return Err(NameError::InvalidEdge);
    }

    let mut previous_separator = false;
    for ch in trimmed.chars() {
        let separator = is_separator(ch);
        if separator && previous_separator {
            return Err(NameError::RepeatedSeparator);
        }
        previous_separator = separator;
    }

    if reserved_names().contains(trimmed.to_lowercase().as_str()) {
        return Err(NameError::Reserved);
    }

    Ok(trimmed.to_string())
}

/// Validate a character name with the in-game rules
pub fn validate_character_name(name: &str) -> Result<String, NameError> {
    validate_name(name, &NameRules::character())
}

/// Validate an account login name
pub fn validate_account_name(name: &str) -> Result<String, NameError> {
    validate_name(name, &NameRules::account())
}
