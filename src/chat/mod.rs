//! Two-party conversation model and the client-side session.
//!
//! - [`identity`]: participant, conversation and message identifiers
//! - [`message`]: the canonical message record and wire normalization
//! - [`reconcile`]: folding confirmed messages into the visible list
//! - [`session`]: the per-conversation state machine

pub mod identity;
pub mod message;
pub mod reconcile;
pub mod session;

pub use identity::{ConversationId, MessageId, ParticipantId};
pub use message::MessageRecord;
pub use reconcile::{MatchPolicy, Reconciled, ReconciliationEngine};
pub use session::{Binding, ConversationSession, SendOutcome, SessionPhase, SessionSnapshot};
