/// Delivery coordinator: outbound send, typing and read intents with a
/// socket-first path and a REST fallback, plus reconciliation of inbound messages.
use crate::chat_types::{
    ChatMessage, ContentBlock, MarkReadRequest, MessagePreview, MessageStatus, SendMessageRequest,
    TypingRequest,
};
use crate::config::{Config, Destinations, SentConfirmation};
use crate::connection::ConnectionManager;
use crate::error::{ChatError, Result};
use crate::rest::ChatApi;
use crate::store::{ConversationStore, UpsertOutcome};
use crate::utils::{EventEmitter, HandlerId};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct DeliveryInner {
    current_user: RwLock<Option<String>>,
    connection: ConnectionManager,
    api: Arc<dyn ChatApi>,
    store: ConversationStore,
    destinations: Destinations,
    sent_confirmation: SentConfirmation,
    ack_timeout: Duration,
    /// client id -> timer failing the message if no echo arrives
    pending_acks: Mutex<HashMap<String, AbortHandle>>,
    notifications: EventEmitter<ChatMessage>,
}

#[derive(Clone)]
pub struct DeliveryCoordinator {
    inner: Arc<DeliveryInner>,
}

impl DeliveryCoordinator {
    pub fn new(
        config: &Config,
        connection: ConnectionManager,
        api: Arc<dyn ChatApi>,
        store: ConversationStore,
    ) -> Self {
        Self {
            inner: Arc::new(DeliveryInner {
                current_user: RwLock::new(None),
                connection,
                api,
                store,
                destinations: config.destinations.clone(),
                sent_confirmation: config.sent_confirmation,
                ack_timeout: config.ack_timeout,
                pending_acks: Mutex::new(HashMap::new()),
                notifications: EventEmitter::new("notification"),
            }),
        }
    }

    pub fn current_user(&self) -> Option<String> {
        self.inner
            .current_user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_current_user(&self, user_id: Option<String>) {
        *self
            .inner
            .current_user
            .write()
            .unwrap_or_else(PoisonError::into_inner) = user_id;
    }

    /// Inbound messages from other users in conversations that are not open
    pub fn on_notification(&self, f: impl Fn(&ChatMessage) + Send + Sync + 'static) -> HandlerId {
        self.inner.notifications.subscribe(f)
    }

    pub fn remove_notification_handler(&self, id: HandlerId) -> bool {
        self.inner.notifications.unsubscribe(id)
    }

    /// Messages still waiting for their server echo
    pub fn pending_acks(&self) -> usize {
        self.inner.acks().len()
    }

    /// Send a message. The local copy is inserted in Sending state before any
    /// network work. Connected: published on the socket only. Otherwise: one
    /// REST call whose response is merged as confirmed.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        contents: Vec<ContentBlock>,
        reply_to: Option<MessagePreview>,
    ) -> Result<ChatMessage> {
        if contents.is_empty() {
            return Err(ChatError::InvalidMessage(
                "a message needs at least one content block".to_string(),
            ));
        }
        let sender_id = self
            .current_user()
            .ok_or_else(|| ChatError::Auth("no signed-in user".to_string()))?;

        let client_id = Uuid::new_v4().to_string();
        let message = ChatMessage {
            id: client_id.clone(),
            client_id: Some(client_id),
            conversation_id: conversation_id.to_string(),
            sender_id,
            sent_at: Utc::now(),
            contents,
            status: MessageStatus::Sending,
            read_by: BTreeSet::new(),
            reply_to,
        };
        self.inner.store.upsert_message(message.clone());
        self.deliver(message).await
    }

    /// Retry a Failed message under its original client id
    pub async fn resend_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<ChatMessage> {
        let message = self
            .inner
            .store
            .reset_for_resend(conversation_id, message_id)
            .ok_or_else(|| {
                ChatError::InvalidMessage(format!(
                    "message {} in {} is not a failed message",
                    message_id, conversation_id
                ))
            })?;
        info!("Resending message {} in {}", message_id, conversation_id);
        self.deliver(message).await
    }

    async fn deliver(&self, message: ChatMessage) -> Result<ChatMessage> {
        let conversation_id = message.conversation_id.clone();
        let client_id = message.client_id.clone().unwrap_or_else(|| message.id.clone());
        let request = SendMessageRequest {
            conversation_id: conversation_id.clone(),
            client_id: client_id.clone(),
            contents: message.contents.clone(),
            reply_to_id: message.reply_to.as_ref().map(|p| p.message_id.clone()),
        };

        if self.inner.connection.is_connected() {
            let body = serde_json::to_string(&request)?;
            return match self.inner.connection.publish(&self.inner.destinations.send, &body) {
                Ok(()) => {
                    match self.inner.sent_confirmation {
                        SentConfirmation::Optimistic => {
                            self.inner
                                .store
                                .advance_status(&conversation_id, &client_id, MessageStatus::Sent);
                        }
                        SentConfirmation::ServerEcho => {
                            self.inner.arm_ack_timer(&conversation_id, &client_id);
                        }
                    }
                    debug!("Message {} published to {}", client_id, conversation_id);
                    Ok(self.stored_or(message, &client_id))
                }
                Err(e) => {
                    warn!("Publishing message {} to {} failed: {}", client_id, conversation_id, e);
                    self.inner
                        .store
                        .advance_status(&conversation_id, &client_id, MessageStatus::Failed);
                    Err(ChatError::Delivery(format!("socket publish failed: {}", e)))
                }
            };
        }

        debug!("Socket unavailable; sending {} over REST", client_id);
        match self.inner.api.send_message(&request).await {
            Ok(mut confirmed) => {
                confirmed.client_id.get_or_insert(client_id.clone());
                confirmed.status = confirmed.status.advanced_to(MessageStatus::Sent);
                self.inner.store.upsert_message(confirmed.clone());
                Ok(self.stored_or(confirmed, &client_id))
            }
            Err(e) => {
                warn!("REST send of {} to {} failed: {}", client_id, conversation_id, e);
                self.inner
                    .store
                    .advance_status(&conversation_id, &client_id, MessageStatus::Failed);
                Err(ChatError::Delivery(format!("REST send failed: {}", e)))
            }
        }
    }

    fn stored_or(&self, fallback: ChatMessage, client_id: &str) -> ChatMessage {
        self.inner
            .store
            .message(&fallback.conversation_id, client_id)
            .unwrap_or(fallback)
    }

    /// Typing signal over the socket. Returns false without error when disconnected.
    pub fn send_typing(&self, conversation_id: &str, is_typing: bool) -> bool {
        if !self.inner.connection.is_connected() {
            return false;
        }
        let request = TypingRequest {
            conversation_id: conversation_id.to_string(),
            is_typing,
        };
        let sent = serde_json::to_string(&request)
            .map_err(ChatError::from)
            .and_then(|body| self.inner.connection.publish(&self.inner.destinations.typing, &body));
        match sent {
            Ok(()) => true,
            Err(e) => {
                debug!("Typing signal for {} dropped: {}", conversation_id, e);
                false
            }
        }
    }

    /// Zero the local unread counter, then tell the server over the socket
    /// or, if that is not possible, over REST.
    pub async fn mark_as_read(
        &self,
        conversation_id: &str,
        message_ids: Option<Vec<String>>,
    ) -> Result<()> {
        if let Some(user_id) = self.current_user() {
            self.inner.store.reset_unread(conversation_id, &user_id);
        }
        let request = MarkReadRequest {
            conversation_id: conversation_id.to_string(),
            message_ids,
        };

        if self.inner.connection.is_connected() {
            let body = serde_json::to_string(&request)?;
            match self.inner.connection.publish(&self.inner.destinations.read, &body) {
                Ok(()) => return Ok(()),
                Err(e) => warn!(
                    "Read marker for {} not published ({}); using REST",
                    conversation_id, e
                ),
            }
        }

        self.inner
            .api
            .mark_read(&request)
            .await
            .map_err(|e| {
                ChatError::Delivery(format!("mark read for {} failed: {}", conversation_id, e))
            })
    }

    /// Merge one inbound message. Own echoes settle the pending send; new
    /// messages from others are marked read when their conversation is open,
    /// otherwise they count as unread and raise a notification.
    pub fn handle_inbound(&self, message: &ChatMessage) -> UpsertOutcome {
        let me = self.current_user();
        let own = me.as_deref() == Some(message.sender_id.as_str());
        let mut message = message.clone();

        if own {
            let settled = message
                .client_id
                .as_deref()
                .map(|id| self.inner.cancel_ack(id))
                .unwrap_or(false)
                || self.inner.cancel_ack(&message.id);
            if settled {
                debug!("Echo confirmed message {}", message.id);
            }
            message.status = message.status.advanced_to(MessageStatus::Sent);
        }

        let conversation_id = message.conversation_id.clone();
        let message_id = message.id.clone();
        let outcome = self.inner.store.upsert_message(message.clone());
        if !outcome.inserted || own {
            return outcome;
        }

        if self.inner.store.is_active(&conversation_id) {
            let coordinator = self.clone();
            tokio::spawn(async move {
                if let Err(e) = coordinator
                    .mark_as_read(&conversation_id, Some(vec![message_id]))
                    .await
                {
                    warn!("Auto read marker failed: {}", e);
                }
            });
        } else {
            if let Some(me) = me {
                self.inner.store.increment_unread(&conversation_id, &me);
            }
            self.inner.notifications.emit(&message);
        }
        outcome
    }

    /// Drop every pending echo timer
    pub fn cancel_pending(&self) {
        for (_, timer) in self.inner.acks().drain() {
            timer.abort();
        }
    }
}

impl DeliveryInner {
    fn acks(&self) -> MutexGuard<'_, HashMap<String, AbortHandle>> {
        self.pending_acks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_ack(&self, client_id: &str) -> bool {
        match self.acks().remove(client_id) {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    fn arm_ack_timer(self: &Arc<Self>, conversation_id: &str, client_id: &str) {
        let weak: Weak<DeliveryInner> = Arc::downgrade(self);
        let conversation_id = conversation_id.to_string();
        let key = client_id.to_string();
        let ttl = self.ack_timeout;
        let task = tokio::spawn(async move {
            sleep(ttl).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.acks().remove(&key);
            let status = inner
                .store
                .advance_status(&conversation_id, &key, MessageStatus::Failed);
            if status == Some(MessageStatus::Failed) {
                warn!("No echo for message {} in {} within {:?}", key, conversation_id, ttl);
            }
        });
        if let Some(previous) = self.acks().insert(client_id.to_string(), task.abort_handle()) {
            previous.abort();
        }
    }
}
