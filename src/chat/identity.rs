//! Participant and conversation identifiers.
//!
//! A conversation between two participants is keyed by the two identifiers
//! sorted ascending and joined with [`SEPARATOR`]. Participant identifiers
//! may not contain the separator, so distinct pairs never collide.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Character joining the two participants of a conversation id.
pub const SEPARATOR: char = '_';

/// Opaque identifier naming a chat user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Validate and wrap a participant identifier.
    ///
    /// # Errors
    /// Returns an error if the identifier is blank, padded with whitespace,
    /// or contains [`SEPARATOR`].
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ValidationError::EmptyParticipant);
        }
        if raw.trim() != raw {
            return Err(ValidationError::UntrimmedParticipant(raw));
        }
        if raw.contains(SEPARATOR) {
            return Err(ValidationError::SeparatorInParticipant(raw));
        }
        Ok(Self(raw))
    }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ParticipantId> for String {
    fn from(value: ParticipantId) -> Self {
        value.0
    }
}

impl AsRef<str> for ParticipantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical key for an unordered pair of participants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Derive the conversation id shared by `a` and `b`.
    ///
    /// `between(a, b) == between(b, a)` for every pair.
    #[must_use]
    pub fn between(a: &ParticipantId, b: &ParticipantId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{low}{SEPARATOR}{high}"))
    }

    /// Accept a conversation id as reported by a store, without validation.
    #[must_use]
    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the id text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the id back into its two participants, lowest first.
    ///
    /// Returns `None` for ids that were not produced by [`Self::between`].
    #[must_use]
    pub fn participants(&self) -> Option<(ParticipantId, ParticipantId)> {
        let (low, high) = self.0.split_once(SEPARATOR)?;
        let low = ParticipantId::parse(low).ok()?;
        let high = ParticipantId::parse(high).ok()?;
        (low <= high).then_some((low, high))
    }

    /// Whether `participant` is one of the two sides of this conversation.
    #[must_use]
    pub fn involves(&self, participant: &ParticipantId) -> bool {
        self.participants()
            .is_some_and(|(low, high)| &low == participant || &high == participant)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Store-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap a store-assigned identifier.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Generate a fresh id for a newly stored message.
    ///
    /// With feature `uuid_v7` enabled ids sort by creation time.
    #[must_use]
    pub fn generate() -> Self {
        #[cfg(feature = "uuid_v7")]
        let id = Uuid::now_v7();
        #[cfg(not(feature = "uuid_v7"))]
        let id = Uuid::new_v4();
        Self(id.to_string())
    }

    /// Borrow the id text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
