//! Two-party chat synchronization against a remote conversation store.

#![deny(unsafe_code)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![deny(unused_must_use)]
#![deny(nonstandard_style)]
// Clippy
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![deny(clippy::print_stdout)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_in_result)]
#![deny(clippy::redundant_clone)]
#![deny(clippy::too_many_arguments)]
#![allow(clippy::module_name_repetitions)]

/// Conversation identity, messages, reconciliation and sessions.
pub mod chat;
/// Configuration loaded from the environment.
pub mod config;
/// Error types.
pub mod error;
/// Development conversation store server.
#[allow(clippy::missing_errors_doc, clippy::unused_async)]
pub mod server;
/// Entry helpers for the binaries.
pub mod start_chat;
/// Conversation store clients.
pub mod store;

pub use chat::{ConversationSession, MatchPolicy, MessageRecord, SendOutcome, SessionPhase};
pub use config::ChatConfig;
pub use error::{ChatError, ChatResult, ValidationError};
pub use store::{ConversationStore, HttpConversationStore, MemoryConversationStore};
