//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::store::MemoryConversationStore;

/// Shared application state.
#[derive(Debug, Default)]
pub struct AppState {
    /// Backing message store.
    pub store: Arc<MemoryConversationStore>,
}

impl AppState {
    /// Create a new application state with an empty store.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a state serving an existing store.
    #[must_use]
    pub fn with_store(store: Arc<MemoryConversationStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }
}
