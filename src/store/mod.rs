//! Remote conversation store access.
//!
//! [`ConversationStore`] is the seam between a session and wherever the
//! messages actually live:
//! - [`HttpConversationStore`], the HTTP/JSON binding
//! - [`MemoryConversationStore`], an in-process store for tests and the
//!   development server

pub mod http;
pub mod memory;

pub use http::HttpConversationStore;
pub use memory::MemoryConversationStore;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chat::identity::{ConversationId, MessageId, ParticipantId};
use crate::chat::message::MessageRecord;
use crate::error::ChatResult;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request to remove a persisted message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    /// Message to remove.
    pub message_id: MessageId,
    /// Participant asking for the removal.
    pub requested_by: ParticipantId,
}

/// Read/append/delete access to persisted conversations.
pub trait ConversationStore: Send + Sync {
    /// Fetch every message of a conversation, in store order.
    ///
    /// # Errors
    /// Returns `Transport` when the store is unreachable and `Remote` when it
    /// rejects the request.
    fn load_conversation<'a>(
        &'a self,
        id: &'a ConversationId,
    ) -> StoreFuture<'a, ChatResult<Vec<MessageRecord>>>;

    /// Persist a new message and return the authoritative record.
    ///
    /// # Errors
    /// Returns `Transport` or `Remote` as for loads.
    fn append_message<'a>(
        &'a self,
        record: &'a MessageRecord,
    ) -> StoreFuture<'a, ChatResult<MessageRecord>>;

    /// Remove a persisted message.
    ///
    /// # Errors
    /// Returns `Remote` with the store's reason when the delete is refused.
    fn delete_message<'a>(&'a self, request: &'a DeleteRequest) -> StoreFuture<'a, ChatResult<()>>;
}

impl<S: ConversationStore + ?Sized> ConversationStore for Arc<S> {
    fn load_conversation<'a>(
        &'a self,
        id: &'a ConversationId,
    ) -> StoreFuture<'a, ChatResult<Vec<MessageRecord>>> {
        (**self).load_conversation(id)
    }

    fn append_message<'a>(
        &'a self,
        record: &'a MessageRecord,
    ) -> StoreFuture<'a, ChatResult<MessageRecord>> {
        (**self).append_message(record)
    }

    fn delete_message<'a>(&'a self, request: &'a DeleteRequest) -> StoreFuture<'a, ChatResult<()>> {
        (**self).delete_message(request)
    }
}
