//! Scripted doubles for the transport and REST boundaries
#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chatsync_core::chat_types::{
    ChatMessage, ContentBlock, Conversation, MarkReadRequest, MessageStatus, Page,
    SendMessageRequest,
};
use chatsync_core::transport::{EventSender, SessionId, TransportEvent};
use chatsync_core::{ChatApi, ChatEngine, ChatError, Config, StaticTokenStore, Transport};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// How the next `open` call ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Accept,
    Fail,
    RejectAuth,
    /// Never completes
    Hang,
}

#[derive(Default)]
struct TransportState {
    script: VecDeque<OpenOutcome>,
    opens: Vec<Instant>,
    published: Vec<(String, String)>,
    subscriptions: Vec<String>,
    events: Option<EventSender>,
    open: bool,
    publish_fails: bool,
    fail_subscribes: usize,
    closes: usize,
    session: Option<SessionId>,
    next_session: SessionId,
    closed_sessions: Vec<SessionId>,
}

/// Transport that accepts every open unless scripted otherwise
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, outcomes: &[OpenOutcome]) {
        self.state.lock().unwrap().script.extend(outcomes.iter().copied());
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens.len()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    /// Sessions ended through `close_session`, in order
    pub fn closed_sessions(&self) -> Vec<SessionId> {
        self.state.lock().unwrap().closed_sessions.clone()
    }

    /// Make the next `n` subscribe calls fail
    pub fn fail_next_subscribes(&self, n: usize) {
        self.state.lock().unwrap().fail_subscribes = n;
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    /// Bodies published to `destination`, in order
    pub fn published(&self, destination: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn published_json(&self, destination: &str) -> Vec<serde_json::Value> {
        self.published(destination)
            .iter()
            .map(|b| serde_json::from_str(b).unwrap())
            .collect()
    }

    pub fn set_publish_fails(&self, fails: bool) {
        self.state.lock().unwrap().publish_fails = fails;
    }

    /// Deliver an inbound frame as the server would
    pub fn push_frame(&self, destination: &str, body: &str) {
        let state = self.state.lock().unwrap();
        let events = state.events.as_ref().expect("no open session");
        events
            .send(TransportEvent::Frame {
                destination: destination.to_string(),
                body: body.to_string(),
            })
            .unwrap();
    }

    /// Kill the socket underneath the session
    pub fn drop_connection(&self) {
        let mut state = self.state.lock().unwrap();
        state.open = false;
        state.session = None;
        if let Some(events) = state.events.take() {
            let _ = events.send(TransportEvent::Closed {
                reason: "peer reset".to_string(),
            });
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _token: &str, events: EventSender) -> chatsync_core::Result<SessionId> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.opens.push(Instant::now());
            let outcome = state.script.pop_front().unwrap_or(OpenOutcome::Accept);
            if outcome == OpenOutcome::Accept {
                state.next_session += 1;
                let id = state.next_session;
                state.open = true;
                state.events = Some(events);
                state.session = Some(id);
                return Ok(id);
            }
            outcome
        };
        match outcome {
            OpenOutcome::Hang => {
                std::future::pending::<()>().await;
                Err(ChatError::Timeout("never".to_string()))
            }
            OpenOutcome::RejectAuth => Err(ChatError::Auth("401".to_string())),
            _ => Err(ChatError::Transport("connection refused".to_string())),
        }
    }

    fn publish(&self, destination: &str, body: &str) -> chatsync_core::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.publish_fails || !state.open {
            return Err(ChatError::Transport("socket not writable".to_string()));
        }
        state.published.push((destination.to_string(), body.to_string()));
        Ok(())
    }

    fn subscribe(&self, destination: &str) -> chatsync_core::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_subscribes > 0 {
            state.fail_subscribes -= 1;
            return Err(ChatError::Transport("SUBSCRIBE not written".to_string()));
        }
        state.subscriptions.push(destination.to_string());
        Ok(())
    }

    fn unsubscribe_all(&self) {}

    fn heartbeat(&self) -> chatsync_core::Result<()> {
        if self.state.lock().unwrap().open {
            Ok(())
        } else {
            Err(ChatError::Transport("closed".to_string()))
        }
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.open = false;
        state.events = None;
        state.session = None;
        state.closes += 1;
    }

    async fn close_session(&self, session: SessionId) {
        let mut state = self.state.lock().unwrap();
        if state.session != Some(session) {
            return;
        }
        state.open = false;
        state.events = None;
        state.session = None;
        state.closes += 1;
        state.closed_sessions.push(session);
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

#[derive(Default)]
struct ApiState {
    conversations: Vec<Conversation>,
    /// Newest first, as the server pages them
    history: HashMap<String, Vec<ChatMessage>>,
    sends: Vec<SendMessageRequest>,
    reads: Vec<MarkReadRequest>,
    list_calls: usize,
    history_calls: usize,
    fail_sends: bool,
}

/// REST double that records calls and answers from canned data
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<ApiState>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        self.state.lock().unwrap().conversations = conversations;
    }

    pub fn set_history(&self, conversation_id: &str, newest_first: Vec<ChatMessage>) {
        self.state
            .lock()
            .unwrap()
            .history
            .insert(conversation_id.to_string(), newest_first);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    pub fn sends(&self) -> Vec<SendMessageRequest> {
        self.state.lock().unwrap().sends.clone()
    }

    pub fn reads(&self) -> Vec<MarkReadRequest> {
        self.state.lock().unwrap().reads.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn history_calls(&self) -> usize {
        self.state.lock().unwrap().history_calls
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn list_conversations(
        &self,
        page: u32,
        size: u32,
    ) -> chatsync_core::Result<Page<Conversation>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        Ok(page_of(&state.conversations, page, size))
    }

    async fn get_or_create_conversation(
        &self,
        peer_id: &str,
    ) -> chatsync_core::Result<Conversation> {
        Ok(Conversation::stub(format!("conv-{}", peer_id), at(0)))
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        page: u32,
        size: u32,
    ) -> chatsync_core::Result<Page<ChatMessage>> {
        let mut state = self.state.lock().unwrap();
        state.history_calls += 1;
        let history = state.history.get(conversation_id).cloned().unwrap_or_default();
        Ok(page_of(&history, page, size))
    }

    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> chatsync_core::Result<ChatMessage> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(ChatError::Http {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        state.sends.push(request.clone());
        Ok(ChatMessage {
            id: format!("srv-{}", state.sends.len()),
            client_id: Some(request.client_id.clone()),
            conversation_id: request.conversation_id.clone(),
            sender_id: "me".to_string(),
            sent_at: Utc::now(),
            contents: request.contents.clone(),
            status: MessageStatus::Sent,
            read_by: BTreeSet::new(),
            reply_to: None,
        })
    }

    async fn mark_read(&self, request: &MarkReadRequest) -> chatsync_core::Result<()> {
        self.state.lock().unwrap().reads.push(request.clone());
        Ok(())
    }
}

fn page_of<T: Clone>(items: &[T], page: u32, size: u32) -> Page<T> {
    let size = size.max(1) as usize;
    let start = (page as usize * size).min(items.len());
    let end = (start + size).min(items.len());
    let total_pages = items.len().div_ceil(size) as u32;
    Page {
        content: items[start..end].to_vec(),
        total_pages,
        number: page,
        last: end >= items.len(),
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Unsigned JWT naming `user_id`, valid for a day
pub fn token_for(user_id: &str) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let claims = serde_json::json!({
        "sub": user_id,
        "exp": Utc::now().timestamp() + 86_400,
    });
    let body = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, body)
}

pub fn message(id: &str, conversation_id: &str, sender_id: &str, secs: i64) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        client_id: None,
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        sent_at: at(secs),
        contents: vec![ContentBlock::text(format!("text of {}", id))],
        status: MessageStatus::Sent,
        read_by: BTreeSet::new(),
        reply_to: None,
    }
}

pub fn frame_of(message: &ChatMessage) -> String {
    serde_json::to_string(message).unwrap()
}

pub fn test_config() -> Config {
    Config::default()
}

pub struct Harness {
    pub engine: ChatEngine,
    pub transport: Arc<FakeTransport>,
    pub api: Arc<FakeApi>,
}

/// Engine signed in as "me" with scripted doubles; not yet initialized
pub fn harness(config: Config) -> Harness {
    let transport = FakeTransport::new();
    let api = FakeApi::new();
    let tokens = Arc::new(StaticTokenStore::new(Some(token_for("me"))));
    let engine = ChatEngine::new(config, transport.clone(), api.clone(), tokens);
    Harness {
        engine,
        transport,
        api,
    }
}

/// Let spawned tasks run; with a paused clock this also advances it by 1ms
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
