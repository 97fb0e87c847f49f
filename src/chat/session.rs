//! Conversation session state machine.
//!
//! A [`ConversationSession`] owns the visible message list for one two-party
//! conversation at a time. It moves through four phases:
//!
//! ```text
//! Unbound --bind--> Loading --load done--> Ready --send--> Sending
//!    ^                 ^                     ^                |
//!    |                 +-------rebind--------+---append done--+
//!    +------------------------unbind-----------------------------
//! ```
//!
//! Every store completion is checked against the conversation that is bound
//! when it lands. Results for a conversation that is no longer bound are
//! dropped, so a slow response for an old peer can never overwrite the list
//! of the current one.
//!
//! State is published through a [`tokio::sync::watch`] channel; callers may
//! either poll [`ConversationSession::snapshot`] or [`subscribe`] to changes.
//!
//! [`subscribe`]: ConversationSession::subscribe

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult, ValidationError};
use crate::store::{ConversationStore, DeleteRequest};

use super::identity::{ConversationId, MessageId, ParticipantId};
use super::message::MessageRecord;
use super::reconcile::{MatchPolicy, Reconciled, ReconciliationEngine};

/// Lifecycle phase of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// No conversation is bound.
    #[default]
    Unbound,
    /// A conversation is bound and its first load has not completed.
    Loading,
    /// The conversation is loaded and no append is outstanding.
    Ready,
    /// At least one append for the bound conversation is outstanding.
    Sending,
}

/// The bound pair of participants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    /// Local participant.
    pub me: ParticipantId,
    /// Remote participant.
    pub peer: ParticipantId,
    /// Conversation derived from `me` and `peer`.
    pub conversation_id: ConversationId,
}

impl Binding {
    /// Bind `me` to `peer`.
    #[must_use]
    pub fn new(me: ParticipantId, peer: ParticipantId) -> Self {
        let conversation_id = ConversationId::between(&me, &peer);
        Self {
            me,
            peer,
            conversation_id,
        }
    }
}

/// Point-in-time view of a session.
#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
    /// Current phase.
    pub phase: SessionPhase,
    /// Bound participants, if any.
    pub binding: Option<Binding>,
    /// Visible messages, oldest first.
    pub messages: Vec<MessageRecord>,
    /// Text the user is composing.
    pub draft: String,
    /// Loads started and not yet finished, across all bindings.
    pub loads_in_flight: usize,
    /// Appends started and not yet finished, across all bindings.
    pub appends_in_flight: usize,
    epoch: u64,
    pending_appends: usize,
}

impl SessionSnapshot {
    /// Conversation currently bound.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.binding.as_ref().map(|b| &b.conversation_id)
    }

    /// Whether no store operation is outstanding.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.loads_in_flight == 0 && self.appends_in_flight == 0
    }

    /// Whether the bound conversation loaded and holds no messages.
    ///
    /// Distinguishes an empty conversation from one still loading.
    #[must_use]
    pub fn is_empty_conversation(&self) -> bool {
        matches!(self.phase, SessionPhase::Ready | SessionPhase::Sending) && self.messages.is_empty()
    }

    fn is_current(&self, id: &ConversationId) -> bool {
        self.conversation_id() == Some(id)
    }
}

/// Result of a send attempt.
#[derive(Debug)]
pub enum SendOutcome {
    /// Nothing was sent.
    Ignored(ValidationError),
    /// The store confirmed the message and the local list was updated.
    Delivered {
        /// Authoritative record returned by the store.
        record: MessageRecord,
        /// How the record was folded into the list.
        reconciled: Reconciled,
    },
    /// The store confirmed the message after the session moved to another
    /// conversation; the local list was left alone.
    Stale(MessageRecord),
    /// The append failed; the pending record stays visible.
    Undelivered(ChatError),
}

impl SendOutcome {
    /// Whether the store accepted the message.
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        matches!(self, Self::Delivered { .. } | Self::Stale(_))
    }
}

struct Inner<S> {
    store: S,
    engine: ReconciliationEngine,
    state: watch::Sender<SessionSnapshot>,
}

/// Synchronizes one two-party conversation with a [`ConversationStore`].
///
/// Cloning is cheap; clones share the same state.
pub struct ConversationSession<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ConversationSession<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ConversationStore + 'static> ConversationSession<S> {
    /// Create an unbound session backed by `store`.
    #[must_use]
    pub fn new(store: S, policy: MatchPolicy) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                store,
                engine: ReconciliationEngine::new(policy),
                state,
            }),
        }
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Receive every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.inner.state.borrow().phase
    }

    /// Visible messages.
    #[must_use]
    pub fn messages(&self) -> Vec<MessageRecord> {
        self.inner.state.borrow().messages.clone()
    }

    /// Bind the session to the conversation between `me` and `peer` and load
    /// it.
    ///
    /// Binding a different pair clears the visible list right away. Binding
    /// the pair that is already bound only reloads. If either id is missing
    /// or invalid the session becomes unbound and nothing is fetched.
    pub async fn bind(&self, me: &str, peer: &str) {
        let binding = match (ParticipantId::parse(me), ParticipantId::parse(peer)) {
            (Ok(me), Ok(peer)) => Binding::new(me, peer),
            (Err(err), _) | (_, Err(err)) => {
                debug!(error = %err, "Participants incomplete, unbinding");
                self.unbind();
                return;
            }
        };
        let conversation_id = binding.conversation_id.clone();

        self.inner.state.send_modify(|s| {
            if s.binding.as_ref() != Some(&binding) {
                info!(conversation = %conversation_id, me = %binding.me, "Binding conversation");
                s.binding = Some(binding);
                s.messages.clear();
                s.phase = SessionPhase::Loading;
                s.epoch += 1;
                s.pending_appends = 0;
            }
            s.loads_in_flight += 1;
        });

        self.run_load(conversation_id).await;
    }

    /// Drop the current binding and clear the list.
    pub fn unbind(&self) {
        self.inner.state.send_if_modified(|s| {
            if s.binding.is_none() && s.phase == SessionPhase::Unbound {
                return false;
            }
            s.binding = None;
            s.messages.clear();
            s.phase = SessionPhase::Unbound;
            s.epoch += 1;
            s.pending_appends = 0;
            true
        });
    }

    /// Reload the bound conversation. Does nothing when unbound.
    pub async fn reload(&self) {
        if let Some(id) = self.begin_load() {
            self.run_load(id).await;
        }
    }

    /// Replace the draft text.
    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.inner.state.send_if_modified(|s| {
            if s.draft == text {
                return false;
            }
            s.draft = text;
            true
        });
    }

    /// Current draft text.
    #[must_use]
    pub fn draft(&self) -> String {
        self.inner.state.borrow().draft.clone()
    }

    /// Send `text` as a new message.
    pub async fn send(&self, text: &str) -> SendOutcome {
        self.set_draft(text);
        self.send_draft().await
    }

    /// Send the current draft.
    ///
    /// The message shows up as pending immediately and the draft is cleared.
    /// A reload is started in the background, then the append is awaited and
    /// its confirmation folded into the list.
    pub async fn send_draft(&self) -> SendOutcome {
        let mut prepared = Err(ValidationError::NotBound);
        self.inner.state.send_if_modified(|s| {
            prepared = Self::prepare_send(s);
            prepared.is_ok()
        });

        let (pending, epoch) = match prepared {
            Ok(prepared) => prepared,
            Err(reason) => {
                debug!(%reason, "Send ignored");
                return SendOutcome::Ignored(reason);
            }
        };

        self.spawn_reload(pending.conversation_id.clone());

        let result = self.inner.store.append_message(&pending).await;

        let mut outcome = None;
        self.inner.state.send_modify(|s| {
            s.appends_in_flight = s.appends_in_flight.saturating_sub(1);
            if s.epoch == epoch {
                s.pending_appends = s.pending_appends.saturating_sub(1);
                if s.pending_appends == 0 && s.phase == SessionPhase::Sending {
                    s.phase = SessionPhase::Ready;
                }
            }

            outcome = Some(match result {
                Ok(confirmed) if s.is_current(&pending.conversation_id) => {
                    let reconciled =
                        self.inner
                            .engine
                            .reconcile(&mut s.messages, &pending, confirmed.clone());
                    debug!(conversation = %pending.conversation_id, ?reconciled, "Message confirmed");
                    SendOutcome::Delivered {
                        record: confirmed,
                        reconciled,
                    }
                }
                Ok(confirmed) => {
                    debug!(conversation = %pending.conversation_id, "Discarding confirmation for unbound conversation");
                    SendOutcome::Stale(confirmed)
                }
                Err(err) => {
                    warn!(conversation = %pending.conversation_id, error = %err, "Failed to send message");
                    SendOutcome::Undelivered(err)
                }
            });
        });

        outcome.unwrap_or(SendOutcome::Ignored(ValidationError::NotBound))
    }

    /// Whether the local participant may delete `record`.
    #[must_use]
    pub fn can_delete(&self, record: &MessageRecord) -> bool {
        let state = self.inner.state.borrow();
        state
            .binding
            .as_ref()
            .is_some_and(|b| !record.is_pending() && record.is_sent_by(&b.me))
    }

    /// Delete a visible message, then reload.
    ///
    /// # Errors
    /// Returns `Validation` without contacting the store when the id is not
    /// in the list or the message belongs to the peer. Store failures are
    /// returned as-is; [`ChatError::user_message`] gives the text to show.
    pub async fn delete(&self, message_id: &MessageId) -> ChatResult<()> {
        let (request, conversation_id) = {
            let state = self.inner.state.borrow();
            let binding = state.binding.as_ref().ok_or(ValidationError::NotBound)?;
            let record = state
                .messages
                .iter()
                .find(|m| m.message_id.as_ref() == Some(message_id))
                .ok_or_else(|| ValidationError::UnknownMessage(message_id.to_string()))?;
            if !record.is_sent_by(&binding.me) {
                return Err(ValidationError::NotOwner(message_id.to_string()).into());
            }
            (
                DeleteRequest {
                    message_id: message_id.clone(),
                    requested_by: binding.me.clone(),
                },
                binding.conversation_id.clone(),
            )
        };

        if let Err(err) = self.inner.store.delete_message(&request).await {
            warn!(message = %message_id, error = %err, "Failed to delete message");
            return Err(err);
        }
        info!(message = %message_id, "Message deleted");

        self.inner.state.send_modify(|s| s.loads_in_flight += 1);
        self.run_load(conversation_id).await;
        Ok(())
    }

    /// Delete `record`, rejecting pending records up front.
    ///
    /// # Errors
    /// As [`delete`](Self::delete), plus `PendingMessage` for unconfirmed
    /// records.
    pub async fn delete_record(&self, record: &MessageRecord) -> ChatResult<()> {
        match &record.message_id {
            Some(id) => self.delete(id).await,
            None => Err(ValidationError::PendingMessage.into()),
        }
    }

    /// Wait until no load or append is outstanding.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(SessionSnapshot::is_idle).await;
    }

    fn prepare_send(s: &mut SessionSnapshot) -> Result<(MessageRecord, u64), ValidationError> {
        if s.draft.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        let binding = s.binding.as_ref().ok_or(ValidationError::NotBound)?;
        if !matches!(s.phase, SessionPhase::Ready | SessionPhase::Sending) {
            return Err(ValidationError::NotReady);
        }

        let draft = std::mem::take(&mut s.draft);
        let pending =
            MessageRecord::pending(binding.me.clone(), binding.peer.clone(), draft.trim());
        s.messages.push(pending.clone());
        s.phase = SessionPhase::Sending;
        s.pending_appends += 1;
        s.appends_in_flight += 1;
        // The reload spawned next is counted here so `wait_idle` cannot slip
        // in between.
        s.loads_in_flight += 1;
        Ok((pending, s.epoch))
    }

    fn begin_load(&self) -> Option<ConversationId> {
        let mut id = None;
        self.inner.state.send_if_modified(|s| {
            id = s.conversation_id().cloned();
            if id.is_some() {
                s.loads_in_flight += 1;
            }
            id.is_some()
        });
        id
    }

    fn spawn_reload(&self, id: ConversationId) {
        let session = self.clone();
        tokio::spawn(async move {
            session.run_load(id).await;
        });
    }

    /// Fetch `id` and apply the result if it is still bound. The caller has
    /// already counted this load in `loads_in_flight`.
    async fn run_load(&self, id: ConversationId) {
        let result = self.inner.store.load_conversation(&id).await;

        self.inner.state.send_modify(|s| {
            s.loads_in_flight = s.loads_in_flight.saturating_sub(1);
            if !s.is_current(&id) {
                debug!(conversation = %id, "Discarding load for unbound conversation");
                return;
            }

            match result {
                Ok(messages) => {
                    debug!(conversation = %id, count = messages.len(), "Conversation loaded");
                    s.messages = messages;
                }
                Err(err) => {
                    warn!(conversation = %id, error = %err, "Failed to load conversation");
                }
            }
            if s.phase == SessionPhase::Loading {
                s.phase = SessionPhase::Ready;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::Notify;

    use super::*;
    use crate::store::{MemoryConversationStore, StoreFuture};

    #[derive(Default)]
    struct ScriptedStore {
        backend: MemoryConversationStore,
        fail_loads: AtomicBool,
        fail_appends: AtomicBool,
        fail_deletes: AtomicBool,
        loads: AtomicUsize,
        appends: AtomicUsize,
        deletes: AtomicUsize,
        held_load: Mutex<Option<ConversationId>>,
        load_release: Notify,
        hold_appends: AtomicBool,
        append_release: Notify,
    }

    impl ScriptedStore {
        fn hold_loads_for(&self, id: &ConversationId) {
            *self.held_load.lock().unwrap() = Some(id.clone());
        }

        fn seed(&self, from: &str, to: &str, body: &str) -> MessageRecord {
            self.backend
                .insert(&MessageRecord::pending(pid(from), pid(to), body))
                .unwrap()
        }
    }

    impl ConversationStore for ScriptedStore {
        fn load_conversation<'a>(
            &'a self,
            id: &'a ConversationId,
        ) -> StoreFuture<'a, ChatResult<Vec<MessageRecord>>> {
            Box::pin(async move {
                self.loads.fetch_add(1, Ordering::SeqCst);
                let held = self.held_load.lock().unwrap().as_ref() == Some(id);
                if held {
                    self.load_release.notified().await;
                }
                if self.fail_loads.load(Ordering::SeqCst) {
                    return Err(ChatError::Transport("connection refused".to_string()));
                }
                self.backend.load_conversation(id).await
            })
        }

        fn append_message<'a>(
            &'a self,
            record: &'a MessageRecord,
        ) -> StoreFuture<'a, ChatResult<MessageRecord>> {
            Box::pin(async move {
                self.appends.fetch_add(1, Ordering::SeqCst);
                if self.hold_appends.load(Ordering::SeqCst) {
                    self.append_release.notified().await;
                }
                if self.fail_appends.load(Ordering::SeqCst) {
                    return Err(ChatError::Transport("connection reset".to_string()));
                }
                self.backend.append_message(record).await
            })
        }

        fn delete_message<'a>(
            &'a self,
            request: &'a DeleteRequest,
        ) -> StoreFuture<'a, ChatResult<()>> {
            Box::pin(async move {
                self.deletes.fetch_add(1, Ordering::SeqCst);
                if self.fail_deletes.load(Ordering::SeqCst) {
                    return Err(ChatError::remote(Some(400), Some("Message not found".to_string())));
                }
                self.backend.delete_message(request).await
            })
        }
    }

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::parse(s).unwrap()
    }

    fn conversation(a: &str, b: &str) -> ConversationId {
        ConversationId::between(&pid(a), &pid(b))
    }

    fn session() -> (Arc<ScriptedStore>, ConversationSession<Arc<ScriptedStore>>) {
        let store = Arc::new(ScriptedStore::default());
        let session = ConversationSession::new(Arc::clone(&store), MatchPolicy::default());
        (store, session)
    }

    async fn wait_for_count(counter: &AtomicUsize, expected: usize) {
        while counter.load(Ordering::SeqCst) < expected {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_new_session_is_unbound() {
        let (store, session) = session();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Unbound);
        assert!(snapshot.binding.is_none());
        assert!(snapshot.is_idle());
        assert_eq!(store.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bind_loads_conversation() {
        let (store, session) = session();
        let first = store.seed("bob", "alice", "hi alice");

        session.bind("alice", "bob").await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Ready);
        assert_eq!(snapshot.conversation_id(), Some(&conversation("alice", "bob")));
        assert_eq!(snapshot.messages, vec![first]);
    }

    #[tokio::test]
    async fn test_bind_with_missing_participant_stays_unbound() {
        let (store, session) = session();

        session.bind("", "bob").await;
        session.bind("alice", "  ").await;

        assert_eq!(session.phase(), SessionPhase::Unbound);
        assert_eq!(store.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_conversation_is_distinct_from_loading() {
        let (store, session) = session();
        let id = conversation("alice", "bob");
        store.hold_loads_for(&id);

        let background = session.clone();
        let bind = tokio::spawn(async move { background.bind("alice", "bob").await });
        wait_for_count(&store.loads, 1).await;

        let loading = session.snapshot();
        assert_eq!(loading.phase, SessionPhase::Loading);
        assert!(!loading.is_empty_conversation());

        store.load_release.notify_one();
        bind.await.unwrap();

        assert!(session.snapshot().is_empty_conversation());
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_list() {
        let (store, session) = session();
        let first = store.seed("alice", "bob", "one");
        session.bind("alice", "bob").await;

        store.fail_loads.store(true, Ordering::SeqCst);
        store.seed("bob", "alice", "two");
        session.reload().await;

        assert_eq!(session.messages(), vec![first]);
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn test_failed_first_load_is_ready_and_empty() {
        let (store, session) = session();
        store.fail_loads.store(true, Ordering::SeqCst);

        session.bind("alice", "bob").await;

        assert_eq!(session.phase(), SessionPhase::Ready);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_rebinding_same_pair_only_reloads() {
        let (store, session) = session();
        session.bind("alice", "bob").await;
        let newer = store.seed("bob", "alice", "later");

        session.bind("alice", "bob").await;

        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
        assert_eq!(session.messages(), vec![newer]);
    }

    #[tokio::test]
    async fn test_stale_load_is_discarded() {
        let (store, session) = session();
        store.seed("alice", "bob", "for bob");
        let for_carol = store.seed("alice", "carol", "for carol");
        store.hold_loads_for(&conversation("alice", "bob"));

        let background = session.clone();
        let first = tokio::spawn(async move { background.bind("alice", "bob").await });
        wait_for_count(&store.loads, 1).await;

        session.bind("alice", "carol").await;
        store.load_release.notify_one();
        first.await.unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.conversation_id(), Some(&conversation("alice", "carol")));
        assert_eq!(snapshot.messages, vec![for_carol]);
        assert!(snapshot.is_idle());
    }

    #[tokio::test]
    async fn test_rebind_clears_list_before_load() {
        let (store, session) = session();
        store.seed("alice", "bob", "for bob");
        session.bind("alice", "bob").await;
        assert_eq!(session.messages().len(), 1);

        store.hold_loads_for(&conversation("alice", "carol"));
        let background = session.clone();
        let bind = tokio::spawn(async move { background.bind("alice", "carol").await });
        wait_for_count(&store.loads, 2).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Loading);
        assert!(snapshot.messages.is_empty());

        store.load_release.notify_one();
        bind.await.unwrap();
    }

    #[tokio::test]
    async fn test_unbind_clears_state() {
        let (store, session) = session();
        store.seed("alice", "bob", "hello");
        session.bind("alice", "bob").await;

        session.unbind();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Unbound);
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.binding.is_none());
    }

    #[tokio::test]
    async fn test_whitespace_send_is_ignored() {
        let (store, session) = session();
        session.bind("alice", "bob").await;

        let outcome = session.send("   \n").await;

        assert!(matches!(outcome, SendOutcome::Ignored(ValidationError::EmptyText)));
        assert_eq!(store.appends.load(Ordering::SeqCst), 0);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_unbound_is_ignored() {
        let (store, session) = session();

        let outcome = session.send("hello").await;

        assert!(matches!(outcome, SendOutcome::Ignored(ValidationError::NotBound)));
        assert_eq!(store.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_send_while_loading_is_ignored() {
        let (store, session) = session();
        store.hold_loads_for(&conversation("alice", "bob"));
        let background = session.clone();
        let bind = tokio::spawn(async move { background.bind("alice", "bob").await });
        wait_for_count(&store.loads, 1).await;

        let outcome = session.send("too early").await;

        assert!(matches!(outcome, SendOutcome::Ignored(ValidationError::NotReady)));
        assert_eq!(session.draft(), "too early");
        store.load_release.notify_one();
        bind.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_shows_pending_then_confirms() {
        let (store, session) = session();
        session.bind("alice", "bob").await;
        store.hold_loads_for(&conversation("alice", "bob"));
        store.hold_appends.store(true, Ordering::SeqCst);

        session.set_draft("hello");
        let background = session.clone();
        let send = tokio::spawn(async move { background.send_draft().await });
        wait_for_count(&store.appends, 1).await;

        let sending = session.snapshot();
        assert_eq!(sending.phase, SessionPhase::Sending);
        assert!(sending.draft.is_empty());
        let pending = sending.messages.last().unwrap();
        assert!(pending.is_pending());
        assert_eq!(pending.sender_id, pid("alice"));
        assert_eq!(pending.recipient_id, pid("bob"));
        assert_eq!(pending.body, "hello");

        store.append_release.notify_one();
        let outcome = send.await.unwrap();
        store.load_release.notify_one();
        session.wait_idle().await;

        let SendOutcome::Delivered { record, .. } = outcome else {
            panic!("expected delivery, got {outcome:?}");
        };
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.messages(), vec![record]);
    }

    #[tokio::test]
    async fn test_send_end_to_end_single_entry() {
        let (store, session) = session();
        session.bind("alice", "bob").await;

        let outcome = session.send("hello").await;
        session.wait_idle().await;

        assert!(outcome.is_persisted());
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].is_pending());
        assert_eq!(messages[0].body, "hello");
        assert_eq!(store.backend.messages(&conversation("alice", "bob")), messages);
        // bind plus the reload triggered by the send
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_send_trims_body() {
        let (store, session) = session();
        session.bind("alice", "bob").await;

        let outcome = session.send("  hello  \n").await;
        session.wait_idle().await;

        let SendOutcome::Delivered { record, .. } = outcome else {
            panic!("expected delivery, got {outcome:?}");
        };
        assert_eq!(record.body, "hello");
        assert_eq!(store.backend.messages(&conversation("alice", "bob"))[0].body, "hello");
        assert_eq!(session.messages()[0].body, "hello");
    }

    #[tokio::test]
    async fn test_failed_append_keeps_pending() {
        let (store, session) = session();
        session.bind("alice", "bob").await;
        store.hold_loads_for(&conversation("alice", "bob"));
        store.fail_appends.store(true, Ordering::SeqCst);

        let outcome = session.send("hello").await;

        assert!(matches!(outcome, SendOutcome::Undelivered(ChatError::Transport(_))));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Ready);
        assert_eq!(snapshot.messages.len(), 1);
        assert!(snapshot.messages[0].is_pending());
        assert_eq!(snapshot.messages[0].body, "hello");

        store.load_release.notify_one();
        session.wait_idle().await;
    }

    #[tokio::test]
    async fn test_stale_confirmation_not_applied() {
        let (store, session) = session();
        session.bind("alice", "bob").await;
        store.hold_appends.store(true, Ordering::SeqCst);

        let background = session.clone();
        let send = tokio::spawn(async move { background.send("for bob").await });
        wait_for_count(&store.appends, 1).await;

        session.bind("alice", "carol").await;
        assert_eq!(session.phase(), SessionPhase::Ready);

        store.append_release.notify_one();
        let outcome = send.await.unwrap();
        session.wait_idle().await;

        assert!(matches!(outcome, SendOutcome::Stale(_)));
        assert!(session.messages().is_empty());
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn test_delete_own_message_reloads() {
        let (store, session) = session();
        let mine = store.seed("alice", "bob", "oops");
        let theirs = store.seed("bob", "alice", "hi");
        session.bind("alice", "bob").await;

        assert!(session.can_delete(&mine));
        session.delete(mine.message_id.as_ref().unwrap()).await.unwrap();

        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
        assert_eq!(session.messages(), vec![theirs]);
    }

    #[tokio::test]
    async fn test_delete_peer_message_rejected_locally() {
        let (store, session) = session();
        let theirs = store.seed("bob", "alice", "hi");
        session.bind("alice", "bob").await;

        assert!(!session.can_delete(&theirs));
        let err = session
            .delete(theirs.message_id.as_ref().unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Validation(ValidationError::NotOwner(_))));
        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
        assert_eq!(session.messages(), vec![theirs]);
    }

    #[tokio::test]
    async fn test_delete_unknown_or_pending_rejected() {
        let (store, session) = session();
        session.bind("alice", "bob").await;

        let err = session.delete(&MessageId::new("missing")).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(ValidationError::UnknownMessage(_))));

        let pending = MessageRecord::pending(pid("alice"), pid("bob"), "draft");
        assert!(!session.can_delete(&pending));
        let err = session.delete_record(&pending).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(ValidationError::PendingMessage)));

        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_failure_surfaces_reason() {
        let (store, session) = session();
        let mine = store.seed("alice", "bob", "keep");
        session.bind("alice", "bob").await;
        store.fail_deletes.store(true, Ordering::SeqCst);

        let err = session.delete_record(&mine).await.unwrap_err();

        assert_eq!(err.user_message(), "Message not found");
        assert_eq!(session.messages(), vec![mine]);
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let (store, session) = session();
        store.seed("bob", "alice", "hi");
        let mut rx = session.subscribe();

        session.bind("alice", "bob").await;

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.phase, SessionPhase::Ready);
        assert_eq!(snapshot.messages.len(), 1);
    }
}
