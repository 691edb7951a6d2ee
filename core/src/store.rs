/// Conversation store: in-memory state for conversations, messages, typing, unread and presence.
/// Mutated only by the engine components; the UI reads snapshots and listens to `subscribe()`.
use crate::chat_types::{
    ChatMessage, Conversation, MessageStatus, PresenceEntry, ReadReceiptEvent, ReceiptKind,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// What changed in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Conversations,
    Messages { conversation_id: String },
    Typing { conversation_id: String },
    Unread { conversation_id: String },
    Presence { user_id: String },
    Active { conversation_id: Option<String> },
}

/// Result of merging one message into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The message was not known before (by id or client id)
    pub inserted: bool,
    /// The conversation had to be created as a stub
    pub new_conversation: bool,
}

struct TypingEntry {
    generation: u64,
    timer: Option<AbortHandle>,
}

#[derive(Default)]
struct StoreState {
    conversations: HashMap<String, Conversation>,
    /// Per conversation, ascending by sent_at
    messages: HashMap<String, Vec<ChatMessage>>,
    typing: HashMap<String, HashMap<String, TypingEntry>>,
    presence: HashMap<String, PresenceEntry>,
    active: Option<String>,
    typing_generation: u64,
}

struct StoreInner {
    state: RwLock<StoreState>,
    changes: broadcast::Sender<StoreChange>,
    typing_ttl: Duration,
}

#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<StoreInner>,
}

impl ConversationStore {
    pub fn new(typing_ttl: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(StoreState::default()),
                changes,
                typing_ttl,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, change: StoreChange) {
        // No receivers is fine
        let _ = self.inner.changes.send(change);
    }

    /// Change feed for UI layers
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    /// Conversations, most recent activity first
    pub fn list_conversations(&self) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self.read().conversations.values().cloned().collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.read().conversations.get(conversation_id).cloned()
    }

    /// Messages of a conversation, oldest first
    pub fn messages(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.read()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn message(&self, conversation_id: &str, message_id: &str) -> Option<ChatMessage> {
        self.read()
            .messages
            .get(conversation_id)?
            .iter()
            .find(|m| m.id == message_id || m.client_id.as_deref() == Some(message_id))
            .cloned()
    }

    pub fn has_messages(&self, conversation_id: &str) -> bool {
        self.read()
            .messages
            .get(conversation_id)
            .map(|m| !m.is_empty())
            .unwrap_or(false)
    }

    /// Users currently typing in a conversation, sorted
    pub fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .read()
            .typing
            .get(conversation_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    pub fn unread_count(&self, conversation_id: &str, user_id: &str) -> u32 {
        self.read()
            .conversations
            .get(conversation_id)
            .map(|c| c.unread_for(user_id))
            .unwrap_or(0)
    }

    /// Sum of `user_id`'s unread counters over all conversations
    pub fn unread_total(&self, user_id: &str) -> u32 {
        self.read()
            .conversations
            .values()
            .map(|c| c.unread_for(user_id))
            .sum()
    }

    pub fn presence(&self, user_id: &str) -> Option<PresenceEntry> {
        self.read().presence.get(user_id).cloned()
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.read().active.clone()
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.read().active.as_deref() == Some(conversation_id)
    }

    // ─── Conversations ───────────────────────────────────────────────────────

    /// Replace conversations with fresh backend snapshots
    pub(crate) fn upsert_conversations(&self, fresh: Vec<Conversation>) {
        if fresh.is_empty() {
            return;
        }
        {
            let mut state = self.write();
            for mut conversation in fresh {
                if let Some(existing) = state.conversations.get(&conversation.id) {
                    // Keep locally newer activity the snapshot has not seen yet
                    if existing.updated_at > conversation.updated_at {
                        conversation.updated_at = existing.updated_at;
                        conversation.last_message = existing.last_message.clone();
                    }
                }
                state.conversations.insert(conversation.id.clone(), conversation);
            }
        }
        self.notify(StoreChange::Conversations);
    }

    pub(crate) fn set_active(&self, conversation_id: Option<String>) {
        {
            let mut state = self.write();
            if state.active == conversation_id {
                return;
            }
            state.active = conversation_id.clone();
        }
        self.notify(StoreChange::Active { conversation_id });
    }

    // ─── Messages ────────────────────────────────────────────────────────────

    /// Insert a message or reconcile it with the copy already held (matched by
    /// id or client id). The conversation preview follows the newest message.
    pub(crate) fn upsert_message(&self, message: ChatMessage) -> UpsertOutcome {
        let conversation_id = message.conversation_id.clone();
        let outcome = {
            let mut state = self.write();
            let outcome = upsert_locked(&mut state, message);
            refresh_preview(&mut state, &conversation_id);
            outcome
        };
        if outcome.new_conversation {
            self.notify(StoreChange::Conversations);
        }
        self.notify(StoreChange::Messages { conversation_id });
        outcome
    }

    /// Merge a page of history. Returns how many messages were new.
    pub(crate) fn merge_history(&self, conversation_id: &str, page: Vec<ChatMessage>) -> usize {
        let inserted = {
            let mut state = self.write();
            let mut inserted = 0;
            for message in page {
                if message.conversation_id != conversation_id {
                    warn!(
                        "History for {} contained message {} of {}",
                        conversation_id, message.id, message.conversation_id
                    );
                    continue;
                }
                if upsert_locked(&mut state, message).inserted {
                    inserted += 1;
                }
            }
            state.messages.entry(conversation_id.to_string()).or_default();
            refresh_preview(&mut state, conversation_id);
            inserted
        };
        self.notify(StoreChange::Messages {
            conversation_id: conversation_id.to_string(),
        });
        inserted
    }

    /// Move a message's status forward. Returns the resulting status.
    pub(crate) fn advance_status(
        &self,
        conversation_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> Option<MessageStatus> {
        let result = {
            let mut state = self.write();
            let message = state
                .messages
                .get_mut(conversation_id)?
                .iter_mut()
                .find(|m| m.id == message_id || m.client_id.as_deref() == Some(message_id))?;
            message.status = message.status.advanced_to(status);
            message.status
        };
        self.notify(StoreChange::Messages {
            conversation_id: conversation_id.to_string(),
        });
        Some(result)
    }

    /// Put a Failed message back into Sending. Returns it when that happened.
    pub(crate) fn reset_for_resend(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Option<ChatMessage> {
        let message = {
            let mut state = self.write();
            let message = state
                .messages
                .get_mut(conversation_id)?
                .iter_mut()
                .find(|m| m.id == message_id || m.client_id.as_deref() == Some(message_id))?;
            if message.status != MessageStatus::Failed {
                return None;
            }
            message.reset_for_resend();
            message.clone()
        };
        self.notify(StoreChange::Messages {
            conversation_id: conversation_id.to_string(),
        });
        Some(message)
    }

    // ─── Unread ──────────────────────────────────────────────────────────────

    pub(crate) fn increment_unread(&self, conversation_id: &str, user_id: &str) -> u32 {
        let count = {
            let mut state = self.write();
            let conversation = state
                .conversations
                .entry(conversation_id.to_string())
                .or_insert_with(|| Conversation::stub(conversation_id, Utc::now()));
            let count = conversation.unread_count.entry(user_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.notify(StoreChange::Unread {
            conversation_id: conversation_id.to_string(),
        });
        count
    }

    pub(crate) fn reset_unread(&self, conversation_id: &str, user_id: &str) {
        let changed = {
            let mut state = self.write();
            match state.conversations.get_mut(conversation_id) {
                Some(conversation) => {
                    let previous = conversation.unread_count.insert(user_id.to_string(), 0);
                    previous.unwrap_or(0) != 0
                }
                None => false,
            }
        };
        if changed {
            self.notify(StoreChange::Unread {
                conversation_id: conversation_id.to_string(),
            });
        }
    }

    // ─── Receipts ────────────────────────────────────────────────────────────

    /// Apply a read/delivery receipt. Returns how many messages changed.
    pub(crate) fn apply_read_receipt(&self, event: &ReadReceiptEvent) -> usize {
        let (updated, unread_reset) = {
            let mut state = self.write();
            let mut updated = 0;
            if let Some(messages) = state.messages.get_mut(&event.conversation_id) {
                for message in messages.iter_mut() {
                    if message.sender_id == event.reader_id {
                        continue;
                    }
                    if let Some(ids) = &event.message_ids {
                        let listed = ids.iter().any(|id| {
                            *id == message.id || message.client_id.as_deref() == Some(id.as_str())
                        });
                        if !listed {
                            continue;
                        }
                    }
                    let before = (message.status, message.read_by.len());
                    match event.kind {
                        ReceiptKind::Read => {
                            message.read_by.insert(event.reader_id.clone());
                            message.status = message.status.advanced_to(MessageStatus::Read);
                        }
                        ReceiptKind::Delivered => {
                            message.status = message.status.advanced_to(MessageStatus::Delivered);
                        }
                    }
                    if before != (message.status, message.read_by.len()) {
                        updated += 1;
                    }
                }
            }

            let mut unread_reset = false;
            if event.kind == ReceiptKind::Read {
                if let Some(conversation) = state.conversations.get_mut(&event.conversation_id) {
                    let previous = conversation.unread_count.insert(event.reader_id.clone(), 0);
                    unread_reset = previous.unwrap_or(0) != 0;
                }
            }
            (updated, unread_reset)
        };

        if updated > 0 {
            self.notify(StoreChange::Messages {
                conversation_id: event.conversation_id.clone(),
            });
        }
        if unread_reset {
            self.notify(StoreChange::Unread {
                conversation_id: event.conversation_id.clone(),
            });
        }
        updated
    }

    // ─── Typing ──────────────────────────────────────────────────────────────

    /// Flag or clear a typing user. A flag expires after the typing TTL unless refreshed.
    pub(crate) fn set_typing(&self, conversation_id: &str, user_id: &str, is_typing: bool) {
        let changed = {
            let mut state = self.write();
            if is_typing {
                state.typing_generation += 1;
                let generation = state.typing_generation;
                let timer = self.schedule_typing_expiry(conversation_id, user_id, generation);
                let users = state.typing.entry(conversation_id.to_string()).or_default();
                let previous = users.insert(user_id.to_string(), TypingEntry { generation, timer });
                match previous {
                    Some(old) => {
                        if let Some(timer) = old.timer {
                            timer.abort();
                        }
                        false
                    }
                    None => true,
                }
            } else {
                remove_typing_locked(&mut state, conversation_id, user_id, None)
            }
        };
        if changed {
            self.notify(StoreChange::Typing {
                conversation_id: conversation_id.to_string(),
            });
        }
    }

    fn schedule_typing_expiry(
        &self,
        conversation_id: &str,
        user_id: &str,
        generation: u64,
    ) -> Option<AbortHandle> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to expire typing flag for {} in {}", user_id, conversation_id);
            return None;
        };
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let ttl = self.inner.typing_ttl;
        let conversation_id = conversation_id.to_string();
        let user_id = user_id.to_string();
        let task = runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(inner) = weak.upgrade() {
                let store = ConversationStore { inner };
                store.expire_typing(&conversation_id, &user_id, generation);
            }
        });
        Some(task.abort_handle())
    }

    fn expire_typing(&self, conversation_id: &str, user_id: &str, generation: u64) {
        let removed = {
            let mut state = self.write();
            remove_typing_locked(&mut state, conversation_id, user_id, Some(generation))
        };
        if removed {
            debug!("Typing flag for {} in {} expired", user_id, conversation_id);
            self.notify(StoreChange::Typing {
                conversation_id: conversation_id.to_string(),
            });
        }
    }

    // ─── Presence ────────────────────────────────────────────────────────────

    /// Last write wins per user
    pub(crate) fn apply_presence(&self, entry: PresenceEntry) {
        let user_id = entry.user_id.clone();
        self.write().presence.insert(user_id.clone(), entry);
        self.notify(StoreChange::Presence { user_id });
    }

    /// Drop everything, cancelling pending typing timers
    pub(crate) fn clear(&self) {
        {
            let mut state = self.write();
            for users in state.typing.values() {
                for entry in users.values() {
                    if let Some(timer) = &entry.timer {
                        timer.abort();
                    }
                }
            }
            *state = StoreState::default();
        }
        self.notify(StoreChange::Conversations);
    }
}

fn upsert_locked(state: &mut StoreState, message: ChatMessage) -> UpsertOutcome {
    let conversation_id = message.conversation_id.clone();
    let mut new_conversation = false;
    if !state.conversations.contains_key(&conversation_id) {
        state.conversations.insert(
            conversation_id.clone(),
            Conversation::stub(conversation_id.clone(), message.sent_at),
        );
        new_conversation = true;
    }

    let messages = state.messages.entry(conversation_id).or_default();
    let inserted = match messages.iter().position(|m| m.same_message(&message)) {
        Some(index) => {
            let mut existing = messages.remove(index);
            existing.status = existing.status.advanced_to(message.status);
            existing.read_by.extend(message.read_by);
            existing.client_id = message.client_id.or(existing.client_id);
            existing.id = message.id;
            existing.sent_at = message.sent_at;
            existing.contents = message.contents;
            existing.reply_to = message.reply_to.or(existing.reply_to);
            insert_ordered(messages, existing);
            false
        }
        None => {
            insert_ordered(messages, message);
            true
        }
    };

    UpsertOutcome {
        inserted,
        new_conversation,
    }
}

/// Keeps ascending sent_at order; equal timestamps keep arrival order
fn insert_ordered(messages: &mut Vec<ChatMessage>, message: ChatMessage) {
    let index = messages.partition_point(|m| m.sent_at <= message.sent_at);
    messages.insert(index, message);
}

fn refresh_preview(state: &mut StoreState, conversation_id: &str) {
    let Some(newest) = state.messages.get(conversation_id).and_then(|m| m.last()) else {
        return;
    };
    let preview = newest.preview();
    if let Some(conversation) = state.conversations.get_mut(conversation_id) {
        if conversation.updated_at <= preview.sent_at || conversation.last_message.is_none() {
            conversation.updated_at = conversation.updated_at.max(preview.sent_at);
            conversation.last_message = Some(preview);
        }
    }
}

/// Remove a typing entry; with `generation`, only if it is still that timer's entry
fn remove_typing_locked(
    state: &mut StoreState,
    conversation_id: &str,
    user_id: &str,
    generation: Option<u64>,
) -> bool {
    let Some(users) = state.typing.get_mut(conversation_id) else {
        return false;
    };
    let matches = users
        .get(user_id)
        .map(|e| generation.map(|g| g == e.generation).unwrap_or(true))
        .unwrap_or(false);
    if !matches {
        return false;
    }
    if let Some(entry) = users.remove(user_id) {
        if generation.is_none() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }
    if users.is_empty() {
        state.typing.remove(conversation_id);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_types::ContentBlock;
    use chrono::{DateTime, TimeZone};
    use std::collections::BTreeSet;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: &str, conv: &str, sender: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            client_id: None,
            conversation_id: conv.to_string(),
            sender_id: sender.to_string(),
            sent_at: at(secs),
            contents: vec![ContentBlock::text(id)],
            status: MessageStatus::Sent,
            read_by: BTreeSet::new(),
            reply_to: None,
        }
    }

    fn store() -> ConversationStore {
        ConversationStore::new(Duration::from_millis(3000))
    }

    #[test]
    fn test_messages_stay_ordered_by_sent_at() {
        let store = store();
        for (id, secs) in [("m3", 30), ("m1", 10), ("m4", 40), ("m2", 20), ("m2b", 20)] {
            store.upsert_message(msg(id, "c1", "b", secs));
        }
        let ids: Vec<String> = store.messages("c1").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1", "m2", "m2b", "m3", "m4"]);
    }

    #[test]
    fn test_echo_replaces_optimistic_copy() {
        let store = store();
        let mut local = msg("local-1", "c1", "a", 10);
        local.client_id = Some("local-1".to_string());
        local.status = MessageStatus::Sending;
        assert!(store.upsert_message(local).inserted);

        let mut echo = msg("srv-1", "c1", "a", 12);
        echo.client_id = Some("local-1".to_string());
        let outcome = store.upsert_message(echo.clone());
        assert!(!outcome.inserted);

        // Same echo twice is still one message
        assert!(!store.upsert_message(echo).inserted);
        let messages = store.messages("c1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "srv-1");
        assert_eq!(messages[0].status, MessageStatus::Sent);
        assert_eq!(messages[0].sent_at, at(12));
    }

    #[test]
    fn test_unknown_conversation_gets_stub_and_preview() {
        let store = store();
        let outcome = store.upsert_message(msg("m1", "c9", "b", 5));
        assert!(outcome.new_conversation);
        let conversation = store.conversation("c9").unwrap();
        assert!(conversation.participants.is_empty());
        assert_eq!(conversation.last_message.unwrap().message_id, "m1");
        assert_eq!(conversation.updated_at, at(5));
    }

    #[test]
    fn test_conversations_sorted_by_activity() {
        let store = store();
        store.upsert_conversations(vec![
            Conversation::stub("old", at(1)),
            Conversation::stub("new", at(2)),
        ]);
        store.upsert_message(msg("m1", "old", "b", 100));
        let ids: Vec<String> = store.list_conversations().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["old", "new"]);

        // A stale snapshot does not roll activity back
        store.upsert_conversations(vec![Conversation::stub("old", at(1))]);
        assert_eq!(store.conversation("old").unwrap().updated_at, at(100));
    }

    #[test]
    fn test_unread_bookkeeping() {
        let store = store();
        store.upsert_conversations(vec![
            Conversation::stub("c1", at(0)),
            Conversation::stub("c2", at(0)),
        ]);
        store.increment_unread("c1", "me");
        store.increment_unread("c1", "me");
        store.increment_unread("c2", "me");
        store.increment_unread("c2", "other");
        assert_eq!(store.unread_count("c1", "me"), 2);
        assert_eq!(store.unread_total("me"), 3);

        store.reset_unread("c1", "me");
        assert_eq!(store.unread_count("c1", "me"), 0);
        assert_eq!(store.unread_count("c2", "other"), 1);
        assert_eq!(store.unread_total("me"), 1);
    }

    #[test]
    fn test_read_receipt_updates_peer_messages_only() {
        let store = store();
        store.upsert_message(msg("m1", "c1", "me", 1));
        store.upsert_message(msg("m2", "c1", "me", 2));
        store.upsert_message(msg("m3", "c1", "peer", 3));
        store.increment_unread("c1", "peer");

        let updated = store.apply_read_receipt(&ReadReceiptEvent {
            conversation_id: "c1".to_string(),
            reader_id: "peer".to_string(),
            message_ids: Some(vec!["m1".to_string()]),
            kind: ReceiptKind::Read,
            read_at: None,
        });
        assert_eq!(updated, 1);
        let messages = store.messages("c1");
        assert_eq!(messages[0].status, MessageStatus::Read);
        assert!(messages[0].read_by.contains("peer"));
        assert_eq!(messages[1].status, MessageStatus::Sent);
        assert_eq!(messages[2].status, MessageStatus::Sent);
        assert_eq!(store.unread_count("c1", "peer"), 0);

        store.apply_read_receipt(&ReadReceiptEvent {
            conversation_id: "c1".to_string(),
            reader_id: "peer".to_string(),
            message_ids: None,
            kind: ReceiptKind::Delivered,
            read_at: None,
        });
        let messages = store.messages("c1");
        assert_eq!(messages[0].status, MessageStatus::Read);
        assert_eq!(messages[1].status, MessageStatus::Delivered);
        assert!(messages[1].read_by.is_empty());
    }

    #[test]
    fn test_failed_is_terminal_until_resend() {
        let store = store();
        let mut m = msg("m1", "c1", "me", 1);
        m.status = MessageStatus::Sending;
        store.upsert_message(m);
        assert_eq!(
            store.advance_status("c1", "m1", MessageStatus::Failed),
            Some(MessageStatus::Failed)
        );
        assert_eq!(
            store.advance_status("c1", "m1", MessageStatus::Sent),
            Some(MessageStatus::Failed)
        );

        let resent = store.reset_for_resend("c1", "m1").unwrap();
        assert_eq!(resent.status, MessageStatus::Sending);
        assert!(store.reset_for_resend("c1", "m1").is_none());
        assert_eq!(store.advance_status("c1", "missing", MessageStatus::Sent), None);
    }

    #[test]
    fn test_presence_last_write_wins() {
        let store = store();
        store.apply_presence(PresenceEntry {
            user_id: "u1".to_string(),
            status: crate::chat_types::PresenceStatus::Online,
            last_seen: at(10),
        });
        store.apply_presence(PresenceEntry {
            user_id: "u1".to_string(),
            status: crate::chat_types::PresenceStatus::Offline,
            last_seen: at(5),
        });
        assert_eq!(
            store.presence("u1").unwrap().status,
            crate::chat_types::PresenceStatus::Offline
        );
        assert!(store.presence("u2").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_expires_and_refreshes() {
        let store = store();
        store.set_typing("c1", "b", true);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        store.set_typing("c1", "b", true);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(store.typing_users("c1"), vec!["b"]);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(store.typing_users("c1").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_false_clears_immediately() {
        let store = store();
        let mut changes = store.subscribe();
        store.set_typing("c1", "b", true);
        store.set_typing("c1", "c", true);
        store.set_typing("c1", "b", false);
        assert_eq!(store.typing_users("c1"), vec!["c"]);
        assert_eq!(
            changes.recv().await.unwrap(),
            StoreChange::Typing { conversation_id: "c1".to_string() }
        );
    }

    #[test]
    fn test_active_conversation() {
        let store = store();
        assert!(!store.is_active("c1"));
        store.set_active(Some("c1".to_string()));
        assert!(store.is_active("c1"));
        assert_eq!(store.active_conversation().as_deref(), Some("c1"));
        store.set_active(None);
        assert!(store.active_conversation().is_none());
    }
}
