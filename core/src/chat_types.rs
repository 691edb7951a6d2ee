/// Shared types for the chat engine: domain model and wire payloads
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One participant of a conversation, as delivered by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub shop_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub shop_id: Option<String>,
}

impl Participant {
    /// Shop name wins over the personal name for seller accounts
    pub fn label(&self) -> &str {
        self.shop_name
            .as_deref()
            .or(self.display_name.as_deref())
            .unwrap_or(&self.user_id)
    }
}

/// Short summary of a message, used for list previews and replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub message_id: String,
    pub sender_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Summary of one conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub last_message: Option<MessagePreview>,
    /// Unread messages per user id
    #[serde(default)]
    pub unread_count: HashMap<String, u32>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Placeholder for a conversation we only know by id
    pub fn stub(id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            participants: Vec::new(),
            last_message: None,
            unread_count: HashMap::new(),
            updated_at: at,
        }
    }

    pub fn unread_for(&self, user_id: &str) -> u32 {
        self.unread_count.get(user_id).copied().unwrap_or(0)
    }

    /// The first participant that is not `user_id`
    pub fn peer_of(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id != user_id)
    }
}

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Sending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => 4,
        }
    }

    /// Status after applying `next`: never moves backwards and Failed is terminal.
    /// A resend goes through `ChatMessage::reset_for_resend` instead.
    pub fn advanced_to(self, next: MessageStatus) -> MessageStatus {
        if self == MessageStatus::Failed {
            return self;
        }
        if next == MessageStatus::Failed {
            // Only a message still in flight can fail
            return if self == MessageStatus::Sending { next } else { self };
        }
        if next.rank() > self.rank() {
            next
        } else {
            self
        }
    }
}

/// One block of message content. Each kind carries only its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Image {
        url: String,
        #[serde(default)]
        thumbnail_url: Option<String>,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        file_size: Option<u64>,
        #[serde(default)]
        mime_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Product {
        product_id: String,
        name: String,
        #[serde(default)]
        image_url: Option<String>,
        #[serde(default)]
        price: Option<f64>,
        #[serde(default)]
        shop_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Order {
        order_id: String,
        #[serde(default)]
        order_code: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        total: Option<f64>,
        #[serde(default)]
        item_count: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    File {
        url: String,
        file_name: String,
        #[serde(default)]
        file_size: Option<u64>,
        #[serde(default)]
        mime_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Sticker {
        sticker_id: String,
        url: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// One-line rendering for previews and notifications
    pub fn preview(&self) -> String {
        match self {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::Image { .. } => "[Image]".to_string(),
            ContentBlock::Product { name, .. } => format!("[Product] {}", name),
            ContentBlock::Order { order_code, order_id, .. } => {
                format!("[Order] {}", order_code.as_deref().unwrap_or(order_id))
            }
            ContentBlock::File { file_name, .. } => format!("[File] {}", file_name),
            ContentBlock::Sticker { .. } => "[Sticker]".to_string(),
        }
    }
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    /// Id generated by the sender before the server assigned one
    #[serde(default)]
    pub client_id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    pub sent_at: DateTime<Utc>,
    pub contents: Vec<ContentBlock>,
    #[serde(default = "default_inbound_status")]
    pub status: MessageStatus,
    #[serde(default)]
    pub read_by: BTreeSet<String>,
    #[serde(default)]
    pub reply_to: Option<MessagePreview>,
}

fn default_inbound_status() -> MessageStatus {
    MessageStatus::Sent
}

impl ChatMessage {
    /// Whether `other` is the same logical message (server id or sender-generated id)
    pub fn same_message(&self, other: &ChatMessage) -> bool {
        if self.id == other.id {
            return true;
        }
        let ids = [Some(&self.id), self.client_id.as_ref()];
        let other_ids = [Some(&other.id), other.client_id.as_ref()];
        ids.iter()
            .flatten()
            .any(|a| other_ids.iter().flatten().any(|b| a == b))
    }

    pub fn preview(&self) -> MessagePreview {
        let text = self
            .contents
            .iter()
            .map(ContentBlock::preview)
            .collect::<Vec<_>>()
            .join(" ");
        MessagePreview {
            message_id: self.id.clone(),
            sender_id: self.sender_id.clone(),
            text,
            sent_at: self.sent_at,
        }
    }

    /// Put a failed message back in flight
    pub fn reset_for_resend(&mut self) {
        self.status = MessageStatus::Sending;
    }
}

/// Online status of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

// ─── Inbound events ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub conversation_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

/// Receipt kind carried by a read-receipt event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptKind {
    Delivered,
    #[default]
    Read,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptEvent {
    pub conversation_id: String,
    pub reader_id: String,
    /// `None` covers every message in the conversation
    #[serde(default)]
    pub message_ids: Option<Vec<String>>,
    #[serde(default)]
    pub kind: ReceiptKind,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

pub type PresenceEvent = PresenceEntry;

// ─── Outbound payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub client_id: String,
    pub contents: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub conversation_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub participant_id: String,
}

/// One page of a paged REST listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub number: u32,
    #[serde(default = "default_last")]
    pub last: bool,
}

fn default_last() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_block_wire_format() {
        let raw = r#"[
            {"type":"TEXT","text":"hi"},
            {"type":"IMAGE","url":"https://cdn/x.png","thumbnailUrl":"https://cdn/x_t.png","fileSize":2048},
            {"type":"PRODUCT","productId":"p1","name":"Lamp","price":19.5},
            {"type":"ORDER","orderId":"o9","orderCode":"ORD-9"}
        ]"#;
        let blocks: Vec<ContentBlock> = serde_json::from_str(raw).unwrap();
        assert_eq!(blocks[0], ContentBlock::text("hi"));
        match &blocks[1] {
            ContentBlock::Image { thumbnail_url, file_size, mime_type, .. } => {
                assert_eq!(thumbnail_url.as_deref(), Some("https://cdn/x_t.png"));
                assert_eq!(*file_size, Some(2048));
                assert!(mime_type.is_none());
            }
            other => panic!("expected image, got {:?}", other),
        }
        assert_eq!(blocks[2].preview(), "[Product] Lamp");
        assert_eq!(blocks[3].preview(), "[Order] ORD-9");

        let json = serde_json::to_value(ContentBlock::Sticker {
            sticker_id: "s1".to_string(),
            url: "u".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "STICKER");
        assert_eq!(json["stickerId"], "s1");
    }

    #[test]
    fn test_unknown_content_type_is_rejected() {
        let raw = r#"{"type":"VIDEO","url":"x"}"#;
        assert!(serde_json::from_str::<ContentBlock>(raw).is_err());
    }

    #[test]
    fn test_status_is_monotonic() {
        use MessageStatus::*;
        assert_eq!(Sending.advanced_to(Sent), Sent);
        assert_eq!(Read.advanced_to(Sent), Read);
        assert_eq!(Delivered.advanced_to(Read), Read);
        assert_eq!(Sending.advanced_to(Failed), Failed);
        assert_eq!(Sent.advanced_to(Failed), Sent);
        assert_eq!(Failed.advanced_to(Read), Failed);
    }

    #[test]
    fn test_same_message_matches_client_id() {
        let at = Utc::now();
        let local = ChatMessage {
            id: "local-1".to_string(),
            client_id: Some("local-1".to_string()),
            conversation_id: "c1".to_string(),
            sender_id: "a".to_string(),
            sent_at: at,
            contents: vec![ContentBlock::text("x")],
            status: MessageStatus::Sending,
            read_by: BTreeSet::new(),
            reply_to: None,
        };
        let mut echo = local.clone();
        echo.id = "srv-9".to_string();
        assert!(local.same_message(&echo));

        echo.client_id = None;
        assert!(!local.same_message(&echo));
    }

    #[test]
    fn test_inbound_message_defaults() {
        let raw = r#"{"id":"m1","conversationId":"c1","senderId":"b",
            "sentAt":"2024-05-01T10:00:00Z","contents":[{"type":"TEXT","text":"yo"}]}"#;
        let msg: ChatMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(msg.read_by.is_empty());
        assert_eq!(msg.preview().text, "yo");
    }
}
