//! In-process conversation store.

use dashmap::DashMap;
use tracing::debug;

use crate::chat::identity::{ConversationId, MessageId};
use crate::chat::message::{now_timestamp, MessageRecord};
use crate::error::{ChatError, ChatResult};

use super::{ConversationStore, DeleteRequest, StoreFuture};

/// Status reported for rejected requests, mirroring the HTTP binding.
const BAD_REQUEST: u16 = 400;

/// Thread-safe store keeping every conversation in memory.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    conversations: DashMap<ConversationId, Vec<MessageRecord>>,
    index: DashMap<MessageId, ConversationId>,
}

impl MemoryConversationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages of a conversation, in append order.
    #[must_use]
    pub fn messages(&self, id: &ConversationId) -> Vec<MessageRecord> {
        self.conversations
            .get(id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Total number of stored messages across conversations.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.index.len()
    }

    /// Persist `record`, assigning an id and server timestamp.
    ///
    /// # Errors
    /// Returns `Remote` if the conversation id does not belong to the sender
    /// and recipient.
    pub fn insert(&self, record: &MessageRecord) -> ChatResult<MessageRecord> {
        let expected = ConversationId::between(&record.sender_id, &record.recipient_id);
        if record.conversation_id != expected {
            return Err(reject("Conversation id does not match participants"));
        }

        let stored = MessageRecord {
            message_id: Some(MessageId::generate()),
            timestamp: Some(now_timestamp()),
            ..record.clone()
        };
        if let Some(id) = &stored.message_id {
            self.index.insert(id.clone(), stored.conversation_id.clone());
        }
        self.conversations
            .entry(stored.conversation_id.clone())
            .or_default()
            .push(stored.clone());

        debug!(conversation = %stored.conversation_id, "Stored message");
        Ok(stored)
    }

    /// Remove a message on behalf of its sender.
    ///
    /// # Errors
    /// Returns `Remote` when the id is blank, unknown, or not owned by the
    /// requester.
    pub fn remove(&self, request: &DeleteRequest) -> ChatResult<()> {
        if request.message_id.as_str().trim().is_empty() {
            return Err(reject("Message ID is required"));
        }

        let conversation_id = self
            .index
            .get(&request.message_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| reject("Message not found"))?;

        let mut messages = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| reject("Message not found"))?;
        let position = messages
            .iter()
            .position(|m| m.message_id.as_ref() == Some(&request.message_id))
            .ok_or_else(|| reject("Message not found"))?;

        if !messages[position].is_sent_by(&request.requested_by) {
            return Err(reject("Cannot delete another user's message"));
        }

        messages.remove(position);
        drop(messages);
        self.index.remove(&request.message_id);

        debug!(message = %request.message_id, "Deleted message");
        Ok(())
    }
}

fn reject(reason: &str) -> ChatError {
    ChatError::remote(Some(BAD_REQUEST), Some(reason.to_string()))
}

impl ConversationStore for MemoryConversationStore {
    fn load_conversation<'a>(
        &'a self,
        id: &'a ConversationId,
    ) -> StoreFuture<'a, ChatResult<Vec<MessageRecord>>> {
        Box::pin(async move { Ok(self.messages(id)) })
    }

    fn append_message<'a>(
        &'a self,
        record: &'a MessageRecord,
    ) -> StoreFuture<'a, ChatResult<MessageRecord>> {
        Box::pin(async move { self.insert(record) })
    }

    fn delete_message<'a>(&'a self, request: &'a DeleteRequest) -> StoreFuture<'a, ChatResult<()>> {
        Box::pin(async move { self.remove(request) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::identity::ParticipantId;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::parse(s).unwrap()
    }

    fn reason(err: ChatError) -> Option<String> {
        match err {
            ChatError::Remote { reason, .. } => reason,
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_append_assigns_id_and_timestamp() {
        let store = MemoryConversationStore::new();
        let pending = MessageRecord::pending(pid("alice"), pid("bob"), "hello");

        let stored = store.append_message(&pending).await.unwrap();

        assert!(!stored.is_pending());
        assert!(stored.timestamp.is_some());
        assert_eq!(stored.client_msg_id, pending.client_msg_id);
        assert_eq!(store.load_conversation(&pending.conversation_id).await.unwrap(), vec![stored]);
    }

    #[tokio::test]
    async fn test_load_unknown_conversation_is_empty() {
        let store = MemoryConversationStore::new();
        let id = ConversationId::between(&pid("x"), &pid("y"));
        assert!(store.load_conversation(&id).await.unwrap().is_empty());
    }

    #[test]
    fn test_insert_rejects_mismatched_conversation() {
        let store = MemoryConversationStore::new();
        let mut record = MessageRecord::pending(pid("alice"), pid("bob"), "hello");
        record.conversation_id = ConversationId::from_wire("alice_carol");

        let err = store.insert(&record).unwrap_err();
        assert_eq!(
            reason(err).as_deref(),
            Some("Conversation id does not match participants")
        );
        assert_eq!(store.message_count(), 0);
    }

    #[test]
    fn test_delete_rules() {
        let store = MemoryConversationStore::new();
        let stored = store
            .insert(&MessageRecord::pending(pid("alice"), pid("bob"), "hello"))
            .unwrap();
        let id = stored.message_id.clone().unwrap();

        let blank = DeleteRequest {
            message_id: MessageId::new(" "),
            requested_by: pid("alice"),
        };
        assert_eq!(reason(store.remove(&blank).unwrap_err()).as_deref(), Some("Message ID is required"));

        let unknown = DeleteRequest {
            message_id: MessageId::new("nope"),
            requested_by: pid("alice"),
        };
        assert_eq!(reason(store.remove(&unknown).unwrap_err()).as_deref(), Some("Message not found"));

        let foreign = DeleteRequest {
            message_id: id.clone(),
            requested_by: pid("bob"),
        };
        assert_eq!(
            reason(store.remove(&foreign).unwrap_err()).as_deref(),
            Some("Cannot delete another user's message")
        );

        let own = DeleteRequest {
            message_id: id,
            requested_by: pid("alice"),
        };
        store.remove(&own).unwrap();
        assert!(store.messages(&stored.conversation_id).is_empty());
        assert_eq!(store.message_count(), 0);
    }
}
