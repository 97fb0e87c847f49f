//! Error types for chat synchronization.

use thiserror::Error;

/// Message shown to the user when the store rejects a delete without a reason.
pub const DELETE_FALLBACK_MESSAGE: &str = "Failed to delete message";

/// Locally detected problems that never reach the store.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Participant identifier is empty or whitespace-only.
    #[error("participant identifier is empty")]
    EmptyParticipant,
    /// Participant identifier contains the conversation separator.
    #[error("participant identifier {0:?} contains the conversation separator")]
    SeparatorInParticipant(String),
    /// Participant identifier carries leading or trailing whitespace.
    #[error("participant identifier {0:?} has surrounding whitespace")]
    UntrimmedParticipant(String),
    /// The session has no conversation bound.
    #[error("no conversation is bound")]
    NotBound,
    /// The bound conversation has not finished its initial load.
    #[error("conversation is still loading")]
    NotReady,
    /// Message text is empty after trimming.
    #[error("message text is empty")]
    EmptyText,
    /// The message is not part of the current conversation.
    #[error("message {0} is not in the current conversation")]
    UnknownMessage(String),
    /// The message has not been persisted yet.
    #[error("pending messages cannot be deleted")]
    PendingMessage,
    /// The caller is not the sender of the message.
    #[error("only the sender can delete message {0}")]
    NotOwner(String),
}

/// Errors produced while talking to the conversation store or driving a session.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The store could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store was reached but rejected the operation.
    #[error("store rejected the request{}: {}", status_suffix(.status), reason_text(.reason))]
    Remote {
        /// HTTP (or equivalent) status, when one was available.
        status: Option<u16>,
        /// Human-readable reason supplied by the store.
        reason: Option<String>,
    },

    /// Locally detected invalid state or input.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

fn reason_text(reason: &Option<String>) -> &str {
    reason.as_deref().unwrap_or("no reason given")
}

impl ChatError {
    /// Build a remote rejection with an optional reason.
    #[must_use]
    pub fn remote(status: Option<u16>, reason: Option<String>) -> Self {
        Self::Remote {
            status,
            reason: reason.filter(|r| !r.trim().is_empty()),
        }
    }

    /// Whether the failure was a connectivity problem rather than a rejection.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Text suitable for showing to the user after a failed delete.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote {
                reason: Some(reason),
                ..
            } => reason.clone(),
            Self::Validation(err) => err.to_string(),
            _ => DELETE_FALLBACK_MESSAGE.to_string(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Remote {
                status: err.status().map(|s| s.as_u16()),
                reason: Some(format!("malformed response: {err}")),
            };
        }
        if err.is_builder() {
            return Self::Config(err.to_string());
        }
        Self::Transport(err.to_string())
    }
}

impl From<url::ParseError> for ChatError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid store URL: {err}"))
    }
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
