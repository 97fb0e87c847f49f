//! Folding server-confirmed messages into the local list.

use serde::{Deserialize, Serialize};

use super::message::MessageRecord;

/// How a confirmed message is matched against its pending counterpart.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Match on body and recipient. Two rapid identical messages to the same
    /// recipient cannot be told apart.
    #[default]
    ContentAndRecipient,
    /// Match on the client correlation id, falling back to content when the
    /// correlation id is not found in the list.
    CorrelationId,
}

impl MatchPolicy {
    /// Parse a policy name (`content` or `correlation`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "content" | "content_and_recipient" => Some(Self::ContentAndRecipient),
            "correlation" | "correlation_id" => Some(Self::CorrelationId),
            _ => None,
        }
    }
}

/// Result of a reconciliation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reconciled {
    /// The entry at `index` was replaced in place.
    Replaced {
        /// Position of the replaced entry.
        index: usize,
    },
    /// No entry matched; the confirmed record was appended.
    Appended,
}

/// Merges confirmed records into a message list.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReconciliationEngine {
    policy: MatchPolicy,
}

impl ReconciliationEngine {
    /// Create an engine using `policy`.
    #[must_use]
    pub const fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    /// Policy in use.
    #[must_use]
    pub const fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Replace the last entry matching `pending` with `confirmed`, or append
    /// `confirmed` when nothing matches.
    ///
    /// Only the last match is replaced, so older duplicates stay pending
    /// until their own confirmation arrives.
    pub fn reconcile(
        &self,
        messages: &mut Vec<MessageRecord>,
        pending: &MessageRecord,
        confirmed: MessageRecord,
    ) -> Reconciled {
        match self.find_match(messages, pending) {
            Some(index) => {
                messages[index] = confirmed;
                Reconciled::Replaced { index }
            }
            None => {
                messages.push(confirmed);
                Reconciled::Appended
            }
        }
    }

    fn find_match(&self, messages: &[MessageRecord], pending: &MessageRecord) -> Option<usize> {
        if self.policy == MatchPolicy::CorrelationId {
            if let Some(correlation) = pending.client_msg_id.as_deref() {
                let found = messages
                    .iter()
                    .rposition(|m| m.client_msg_id.as_deref() == Some(correlation));
                if found.is_some() {
                    return found;
                }
            }
        }
        messages
            .iter()
            .rposition(|m| m.body == pending.body && m.recipient_id == pending.recipient_id)
    }
}
