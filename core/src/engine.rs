/// Chat engine: wires transport, connection manager, router, store and
/// delivery coordinator together and exposes the operations a UI calls.
use crate::chat_types::{ChatMessage, ContentBlock, Conversation, MessagePreview, Page};
use crate::collaborators::{image_content, MediaUploader, OrderLookup, ProductCatalog};
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::delivery::DeliveryCoordinator;
use crate::error::{ChatError, Result};
use crate::identity::{TokenStore, UserIdentity};
use crate::rest::ChatApi;
use crate::router::{Channel, ChannelRouter};
use crate::store::ConversationStore;
use crate::transport::Transport;
use crate::utils::HandlerId;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ChatEngine {
    config: Config,
    tokens: Arc<dyn TokenStore>,
    api: Arc<dyn ChatApi>,
    router: Arc<ChannelRouter>,
    connection: ConnectionManager,
    store: ConversationStore,
    delivery: DeliveryCoordinator,
    media: Option<Arc<dyn MediaUploader>>,
    products: Option<Arc<dyn ProductCatalog>>,
    orders: Option<Arc<dyn OrderLookup>>,
    routes: Vec<(Channel, HandlerId)>,
}

impl ChatEngine {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        api: Arc<dyn ChatApi>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let router = Arc::new(ChannelRouter::new(config.destinations.clone()));
        let connection = ConnectionManager::new(config.clone(), transport, router.clone());
        let store = ConversationStore::new(config.typing_ttl);
        let delivery =
            DeliveryCoordinator::new(&config, connection.clone(), api.clone(), store.clone());

        let mut engine = Self {
            config,
            tokens,
            api,
            router,
            connection,
            store,
            delivery,
            media: None,
            products: None,
            orders: None,
            routes: Vec::new(),
        };
        engine.register_routes();
        engine
    }

    pub fn with_media_uploader(mut self, media: Arc<dyn MediaUploader>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_product_catalog(mut self, products: Arc<dyn ProductCatalog>) -> Self {
        self.products = Some(products);
        self
    }

    pub fn with_order_lookup(mut self, orders: Arc<dyn OrderLookup>) -> Self {
        self.orders = Some(orders);
        self
    }

    fn register_routes(&mut self) {
        let delivery = self.delivery.clone();
        let api = self.api.clone();
        let store = self.store.clone();
        let page_size = self.config.page_size;
        let messages = self.router.on_message(move |message| {
            let outcome = delivery.handle_inbound(message);
            if outcome.new_conversation {
                info!(
                    "Message for unknown conversation {}; refreshing the list",
                    message.conversation_id
                );
                let api = api.clone();
                let store = store.clone();
                tokio::spawn(async move {
                    match api.list_conversations(0, page_size).await {
                        Ok(page) => store.upsert_conversations(page.content),
                        Err(e) => warn!("Conversation refresh failed: {}", e),
                    }
                });
            }
        });

        let delivery = self.delivery.clone();
        let store = self.store.clone();
        let typing = self.router.on_typing(move |event| {
            if delivery.current_user().as_deref() == Some(event.user_id.as_str()) {
                return;
            }
            store.set_typing(&event.conversation_id, &event.user_id, event.is_typing);
        });

        let store = self.store.clone();
        let receipts = self.router.on_read_receipt(move |event| {
            let updated = store.apply_read_receipt(event);
            debug!(
                "{:?} receipt from {} updated {} messages in {}",
                event.kind, event.reader_id, updated, event.conversation_id
            );
        });

        let store = self.store.clone();
        let presence = self.router.on_presence(move |entry| store.apply_presence(entry.clone()));

        self.routes = vec![
            (Channel::Messages, messages),
            (Channel::Typing, typing),
            (Channel::ReadReceipts, receipts),
            (Channel::Presence, presence),
        ];
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Read the persisted token and connect with it. Without a usable token
    /// the engine stays Disconnected.
    pub async fn init(&self) -> ConnectionState {
        let Some(token) = self.tokens.load() else {
            info!("No stored token; staying disconnected");
            return self.connection.state();
        };
        let identity = match UserIdentity::from_token(&token) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Stored token unusable: {}", e);
                return self.connection.state();
            }
        };
        if identity.is_expired_at(Utc::now().timestamp()) {
            warn!("Stored token for {} has expired; staying disconnected", identity.user_id);
            return self.connection.state();
        }

        info!("Signed in as {}", identity.user_id);
        self.delivery.set_current_user(Some(identity.user_id));
        self.connection.connect(&token).await
    }

    /// Disconnect and forget all session state
    pub async fn teardown(&self) {
        self.delivery.cancel_pending();
        self.connection.disconnect().await;
        self.store.clear();
        self.delivery.set_current_user(None);
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn current_user(&self) -> Option<String> {
        self.delivery.current_user()
    }

    pub fn on_state_change(
        &self,
        f: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> HandlerId {
        self.connection.on_state_change(f)
    }

    pub fn on_notification(&self, f: impl Fn(&ChatMessage) + Send + Sync + 'static) -> HandlerId {
        self.delivery.on_notification(f)
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    // ─── Conversations ───────────────────────────────────────────────────────

    pub async fn load_conversations(&self, page: u32) -> Result<Page<Conversation>> {
        let listing = self.api.list_conversations(page, self.config.page_size).await?;
        self.store.upsert_conversations(listing.content.clone());
        Ok(listing)
    }

    pub async fn start_conversation(&self, peer_id: &str) -> Result<Conversation> {
        let conversation = self.api.get_or_create_conversation(peer_id).await?;
        self.store.upsert_conversations(vec![conversation.clone()]);
        Ok(conversation)
    }

    /// Make `conversation_id` the open conversation: load its newest page if
    /// nothing is held yet, then mark it read.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<()> {
        self.store.set_active(Some(conversation_id.to_string()));
        if !self.store.has_messages(conversation_id) {
            self.load_older_messages(conversation_id, 0).await?;
        }
        if let Err(e) = self.delivery.mark_as_read(conversation_id, None).await {
            warn!("Could not mark {} read on open: {}", conversation_id, e);
        }
        Ok(())
    }

    pub fn close_conversation(&self) {
        self.store.set_active(None);
    }

    /// Fetch one history page (0 = newest) and merge it. Returns how many
    /// messages were new and whether older pages remain.
    pub async fn load_older_messages(
        &self,
        conversation_id: &str,
        page: u32,
    ) -> Result<(usize, bool)> {
        let listing = self
            .api
            .list_messages(conversation_id, page, self.config.page_size)
            .await?;
        let mut history = listing.content;
        history.reverse();
        let inserted = self.store.merge_history(conversation_id, history);
        debug!("History page {} of {}: {} new", page, conversation_id, inserted);
        Ok((inserted, !listing.last))
    }

    // ─── Sending ─────────────────────────────────────────────────────────────

    fn reply_preview(
        &self,
        conversation_id: &str,
        reply_to_id: Option<&str>,
    ) -> Result<Option<MessagePreview>> {
        match reply_to_id {
            None => Ok(None),
            Some(id) => self
                .store
                .message(conversation_id, id)
                .map(|m| Some(m.preview()))
                .ok_or_else(|| {
                    ChatError::NotFound(format!("message {} in {}", id, conversation_id))
                }),
        }
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        contents: Vec<ContentBlock>,
        reply_to_id: Option<&str>,
    ) -> Result<ChatMessage> {
        let reply_to = self.reply_preview(conversation_id, reply_to_id)?;
        self.delivery.send_message(conversation_id, contents, reply_to).await
    }

    pub async fn send_text(
        &self,
        conversation_id: &str,
        text: &str,
        reply_to_id: Option<&str>,
    ) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidMessage("empty text".to_string()));
        }
        self.send_message(conversation_id, vec![ContentBlock::text(text)], reply_to_id)
            .await
    }

    /// Upload the image, then send it as an Image block
    pub async fn send_image(
        &self,
        conversation_id: &str,
        file_name: &str,
        mime_type: &str,
        data: Bytes,
    ) -> Result<ChatMessage> {
        let media = self
            .media
            .as_ref()
            .ok_or_else(|| ChatError::Config("no media uploader configured".to_string()))?;
        let size = data.len() as u64;
        let uploaded = media.upload_image(file_name, mime_type, data).await?;
        let block = image_content(uploaded, file_name, mime_type, size);
        self.send_message(conversation_id, vec![block], None).await
    }

    pub async fn send_product(
        &self,
        conversation_id: &str,
        product_id: &str,
    ) -> Result<ChatMessage> {
        let products = self
            .products
            .as_ref()
            .ok_or_else(|| ChatError::Config("no product catalog configured".to_string()))?;
        let product = products.product(product_id).await?;
        self.send_message(conversation_id, vec![product.to_content()], None)
            .await
    }

    pub async fn send_order(&self, conversation_id: &str, order_id: &str) -> Result<ChatMessage> {
        let orders = self
            .orders
            .as_ref()
            .ok_or_else(|| ChatError::Config("no order lookup configured".to_string()))?;
        let order = orders.order(order_id).await?;
        self.send_message(conversation_id, vec![order.to_content()], None)
            .await
    }

    pub async fn resend_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<ChatMessage> {
        self.delivery.resend_message(conversation_id, message_id).await
    }

    pub fn send_typing(&self, conversation_id: &str, is_typing: bool) -> bool {
        self.delivery.send_typing(conversation_id, is_typing)
    }

    pub async fn mark_as_read(
        &self,
        conversation_id: &str,
        message_ids: Option<Vec<String>>,
    ) -> Result<()> {
        self.delivery.mark_as_read(conversation_id, message_ids).await
    }
}

/// Dropping the engine stops its background tasks; `teardown` also closes the
/// socket cleanly and clears the store.
impl Drop for ChatEngine {
    fn drop(&mut self) {
        // Route closures hold the coordinator, which holds the router
        for (channel, id) in self.routes.drain(..) {
            self.router.remove_handler(channel, id);
        }
        self.delivery.cancel_pending();
        self.connection.halt();
    }
}
