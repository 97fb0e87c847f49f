//! Canonical message records and wire normalization.
//!
//! Stores name the same fields differently depending on the endpoint
//! (`fromId` vs `senderId`, `message` vs `text`, ...). [`RawMessage`]
//! accepts every known variant and [`RawMessage::into_record`] maps it to
//! the one canonical [`MessageRecord`] used everywhere else.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::identity::{ConversationId, MessageId, ParticipantId};
use crate::error::ValidationError;

/// Current instant in UTC, formatted as RFC 3339 with millisecond precision.
#[must_use]
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Generate a fresh client-side correlation id.
#[must_use]
pub fn new_client_msg_id() -> String {
    Uuid::new_v4().to_string()
}

/// A chat message in canonical shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Author of the message.
    pub sender_id: ParticipantId,
    /// Addressee of the message.
    pub recipient_id: ParticipantId,
    /// Message text; may be empty.
    pub body: String,
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Store-assigned id; `None` while the message is pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Display and ordering timestamp (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Client-generated correlation id, when one was assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
}

impl MessageRecord {
    /// Synthesize a pending record for a message about to be sent.
    #[must_use]
    pub fn pending(
        sender_id: ParticipantId,
        recipient_id: ParticipantId,
        body: impl Into<String>,
    ) -> Self {
        let conversation_id = ConversationId::between(&sender_id, &recipient_id);
        Self {
            sender_id,
            recipient_id,
            body: body.into(),
            conversation_id,
            message_id: None,
            timestamp: Some(now_timestamp()),
            client_msg_id: Some(new_client_msg_id()),
        }
    }

    /// Whether the store has not confirmed this message yet.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.message_id.is_none()
    }

    /// Whether `participant` authored this message.
    #[must_use]
    pub fn is_sent_by(&self, participant: &ParticipantId) -> bool {
        &self.sender_id == participant
    }
}

/// Why a raw message could not be normalized.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedMessage {
    /// None of the sender field variants carried a value.
    #[error("message has no sender")]
    MissingSender,
    /// None of the recipient field variants carried a value.
    #[error("message has no recipient")]
    MissingRecipient,
    /// A participant field failed validation.
    #[error("message has an invalid participant: {0}")]
    InvalidParticipant(#[from] ValidationError),
}

/// A scalar that stores send either as a string or as a number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireScalar {
    /// Textual value.
    Text(String),
    /// Integral value (ids, epoch milliseconds).
    Int(i64),
}

impl WireScalar {
    fn into_text(self) -> Option<String> {
        match self {
            Self::Text(s) => non_empty(s),
            Self::Int(n) => Some(n.to_string()),
        }
    }

    fn into_timestamp(self) -> Option<String> {
        match self {
            Self::Text(s) => non_empty(s),
            Self::Int(ms) => DateTime::<Utc>::from_timestamp_millis(ms)
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

/// Message as sent over the wire, in any of the known field-name variants.
///
/// Also used for outgoing payloads, where only the legacy wire names
/// (`fromId`, `toId`, `message`, `uniqueId`, `createdAt`) are filled.
/// Fields are named after the wire keys they read.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<WireScalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<WireScalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<WireScalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<WireScalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<WireScalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<WireScalar>,
    #[serde(default, rename = "_id", skip_serializing_if = "Option::is_none")]
    pub underscore_id: Option<WireScalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// What to fill missing fields from during normalization.
#[derive(Clone, Copy, Debug)]
pub enum Fallback<'a> {
    /// Entries of a loaded conversation: default the conversation id.
    Conversation(&'a ConversationId),
    /// Response to an append: default every field from the submitted record.
    Pending(&'a MessageRecord),
}

impl RawMessage {
    /// Outgoing wire shape of a record, using the legacy field names.
    #[must_use]
    pub fn from_record(record: &MessageRecord) -> Self {
        Self {
            from_id: Some(record.sender_id.to_string()),
            to_id: Some(record.recipient_id.to_string()),
            message: Some(record.body.clone()),
            conversation_id: Some(record.conversation_id.to_string()),
            unique_id: record
                .message_id
                .as_ref()
                .map(|id| WireScalar::Text(id.to_string())),
            created_at: record.timestamp.clone().map(WireScalar::Text),
            client_msg_id: record.client_msg_id.clone(),
            ..Self::default()
        }
    }

    /// Map this raw message to the canonical record.
    ///
    /// # Errors
    /// Returns an error if no valid sender or recipient can be determined.
    pub fn into_record(self, fallback: Fallback<'_>) -> Result<MessageRecord, MalformedMessage> {
        let pending = match fallback {
            Fallback::Pending(record) => Some(record),
            Fallback::Conversation(_) => None,
        };

        let sender_id = match pick([self.from_id, self.sender_id, self.from]) {
            Some(raw) => ParticipantId::parse(raw)?,
            None => pending
                .map(|p| p.sender_id.clone())
                .ok_or(MalformedMessage::MissingSender)?,
        };
        let recipient_id = match pick([self.to_id, self.recipient_id, self.to]) {
            Some(raw) => ParticipantId::parse(raw)?,
            None => pending
                .map(|p| p.recipient_id.clone())
                .ok_or(MalformedMessage::MissingRecipient)?,
        };

        // Whitespace-only text is kept as sent.
        let body = [self.message, self.text, self.body]
            .into_iter()
            .flatten()
            .find(|text| !text.is_empty())
            .or_else(|| pending.map(|p| p.body.clone()))
            .unwrap_or_default();

        let timestamp = [self.created_at, self.time, self.timestamp]
            .into_iter()
            .flatten()
            .find_map(WireScalar::into_timestamp)
            .or_else(|| pending.and_then(|p| p.timestamp.clone()));

        let message_id = [self.id, self.unique_id, self.message_id, self.underscore_id]
            .into_iter()
            .flatten()
            .find_map(WireScalar::into_text)
            .map(MessageId::new);

        let conversation_id = match self.conversation_id.and_then(non_empty) {
            Some(raw) => ConversationId::from_wire(raw),
            None => match fallback {
                Fallback::Conversation(id) => id.clone(),
                Fallback::Pending(p) => p.conversation_id.clone(),
            },
        };

        let client_msg_id = pick([self.client_msg_id, self.correlation_id])
            .or_else(|| pending.and_then(|p| p.client_msg_id.clone()));

        Ok(MessageRecord {
            sender_id,
            recipient_id,
            body,
            conversation_id,
            message_id,
            timestamp,
            client_msg_id,
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

/// First candidate carrying a non-blank value.
fn pick<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates.into_iter().flatten().find_map(non_empty)
}
