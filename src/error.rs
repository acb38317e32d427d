//! Error taxonomy: local validation failures, remote persistence failures,
//! state-machine misuse and configuration problems.

use thiserror::Error;

use crate::validation::{MAX_ANSWER_LEN, MIN_ANSWER_LEN};

/// Shown when a persistence failure carries no message of its own.
pub const GENERIC_PROGRESS_ERROR: &str = "An error occurred while updating progress";

/// Input rejected before any comparison. `Display` is the user-facing text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Error: Answer is too short. It must be at least {} characters.", MIN_ANSWER_LEN)]
    TooShort,
    #[error("Error: Answer is too long. It must be at most {} characters.", MAX_ANSWER_LEN)]
    TooLong,
    #[error("No SQL queries allow here!, we are looking for the name of the person who commit the crime.")]
    ReservedWord { word: &'static str },
}

/// Any failure of the remote fetch/update sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("{0}")]
    Transport(String),
    #[error("remote HTTP {status}: {}", .message.as_deref().unwrap_or("<no message>"))]
    Remote { status: u16, message: Option<String> },
    #[error("{0}")]
    Decode(String),
    #[error("{0}")]
    NotFound(String),
}

impl PersistenceError {
    /// Text surfaced to the user: the carried message, or the generic fallback.
    pub fn user_message(&self) -> String {
        let msg = match self {
            PersistenceError::Remote { message, .. } => message.clone(),
            PersistenceError::Transport(m)
            | PersistenceError::Decode(m)
            | PersistenceError::NotFound(m) => Some(m.clone()),
        };
        msg.filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| GENERIC_PROGRESS_ERROR.to_string())
    }
}

/// Operation not allowed in the form's current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("submission form is {phase}; action not allowed")]
    NotEditable { phase: &'static str },
    #[error("unknown session")]
    UnknownSession,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_are_user_facing() {
        assert_eq!(
            ValidationError::TooShort.to_string(),
            "Error: Answer is too short. It must be at least 5 characters."
        );
        assert_eq!(
            ValidationError::TooLong.to_string(),
            "Error: Answer is too long. It must be at most 60 characters."
        );
    }

    #[test]
    fn persistence_falls_back_to_generic_message() {
        let e = PersistenceError::Remote { status: 500, message: None };
        assert_eq!(e.user_message(), GENERIC_PROGRESS_ERROR);
        let e = PersistenceError::Remote { status: 400, message: Some("row locked".into()) };
        assert_eq!(e.user_message(), "row locked");
        let e = PersistenceError::Transport("  ".into());
        assert_eq!(e.user_message(), GENERIC_PROGRESS_ERROR);
    }
}
