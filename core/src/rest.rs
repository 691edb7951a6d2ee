/// REST fallback client for the chat backend
///
/// Endpoints (relative to the API base URL):
///   GET  /api/chat/conversations                   ?page=N&size=N
///   POST /api/chat/conversations                   body: {"participantId":"..."}
///   GET  /api/chat/conversations/:id/messages      ?page=N&size=N  (newest first)
///   POST /api/chat/messages                        body: SendMessageRequest
///   POST /api/chat/conversations/:id/read          body: MarkReadRequest
use crate::chat_types::{
    ChatMessage, Conversation, CreateConversationRequest, MarkReadRequest, Page, SendMessageRequest,
};
use crate::error::{ChatError, Result};
use crate::identity::TokenStore;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Request/response operations the engine falls back to when the socket is unavailable
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_conversations(&self, page: u32, size: u32) -> Result<Page<Conversation>>;

    async fn get_or_create_conversation(&self, peer_id: &str) -> Result<Conversation>;

    /// Messages of one conversation, newest first
    async fn list_messages(
        &self,
        conversation_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<ChatMessage>>;

    async fn send_message(&self, request: &SendMessageRequest) -> Result<ChatMessage>;

    async fn mark_read(&self, request: &MarkReadRequest) -> Result<()>;
}

/// `ChatApi` over plain HTTP/1.1 with the hyper client
pub struct HttpChatApi {
    base_url: String,
    tokens: Arc<dyn TokenStore>,
    client: Client<HttpConnector, Full<Bytes>>,
    request_timeout: Duration,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") {
            // The connector speaks plain HTTP; TLS is terminated in front of the API
            return Err(ChatError::Config(format!(
                "REST client needs an http:// base URL, got {}",
                base_url
            )));
        }
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            base_url,
            tokens,
            client,
            request_timeout: Duration::from_secs(15),
        })
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/chat{}", self.base_url, path)
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        body: Option<&B>,
    ) -> Result<T> {
        let bytes = self.execute(method, url, body).await?;
        // An empty 2xx body decodes like JSON null, which fits `()`
        let bytes = if bytes.is_empty() {
            Bytes::from_static(b"null")
        } else {
            bytes
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn execute<B: Serialize>(
        &self,
        method: Method,
        url: String,
        body: Option<&B>,
    ) -> Result<Bytes> {
        let token = self
            .tokens
            .load()
            .ok_or_else(|| ChatError::Auth("no bearer token for REST call".to_string()))?;

        let payload = match body {
            Some(body) => Bytes::from(serde_json::to_vec(body)?),
            None => Bytes::new(),
        };
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(url.as_str())
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/json");
        if body.is_some() {
            builder = builder.header("Content-Type", "application/json");
        }
        let request = builder
            .body(Full::new(payload))
            .map_err(|e| ChatError::Protocol(format!("Invalid request {}: {}", url, e)))?;

        debug!("{} {}", method, url);
        let response = timeout(self.request_timeout, self.client.request(request))
            .await
            .map_err(|_| ChatError::Timeout(format!("{} {}", method, url)))?
            .map_err(|e| ChatError::Transport(format!("{} {} failed: {}", method, url, e)))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map(|c| c.to_bytes())
            .map_err(|e| ChatError::Transport(format!("Reading {} response: {}", url, e)))?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&bytes).trim().to_string();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ChatError::Auth(format!("{} {} rejected with {}", method, url, status))
                }
                StatusCode::NOT_FOUND => ChatError::NotFound(url),
                _ => ChatError::Http {
                    status: status.as_u16(),
                    message,
                },
            });
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self, page: u32, size: u32) -> Result<Page<Conversation>> {
        let url = self.url(&format!("/conversations?page={}&size={}", page, size));
        self.call::<(), _>(Method::GET, url, None).await
    }

    async fn get_or_create_conversation(&self, peer_id: &str) -> Result<Conversation> {
        let body = CreateConversationRequest {
            participant_id: peer_id.to_string(),
        };
        self.call(Method::POST, self.url("/conversations"), Some(&body))
            .await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<ChatMessage>> {
        let url = self.url(&format!(
            "/conversations/{}/messages?page={}&size={}",
            urlencoding::encode(conversation_id),
            page,
            size
        ));
        self.call::<(), _>(Method::GET, url, None).await
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<ChatMessage> {
        self.call(Method::POST, self.url("/messages"), Some(request))
            .await
    }

    async fn mark_read(&self, request: &MarkReadRequest) -> Result<()> {
        let url = self.url(&format!(
            "/conversations/{}/read",
            urlencoding::encode(&request.conversation_id)
        ));
        self.execute(Method::POST, url, Some(request)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticTokenStore;

    fn api(base: &str) -> Result<HttpChatApi> {
        HttpChatApi::new(base, Arc::new(StaticTokenStore::new(Some("t".to_string()))))
    }

    #[test]
    fn test_base_url_is_normalized() {
        let api = api("http://localhost:8080/").unwrap();
        assert_eq!(api.base_url(), "http://localhost:8080");
        assert_eq!(
            api.url("/messages"),
            "http://localhost:8080/api/chat/messages"
        );
    }

    #[test]
    fn test_rejects_non_http_base() {
        assert!(matches!(api("ftp://example"), Err(ChatError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_error() {
        let api =
            HttpChatApi::new("http://127.0.0.1:9", Arc::new(StaticTokenStore::new(None))).unwrap();
        let err = api.list_conversations(0, 30).await.unwrap_err();
        assert!(matches!(err, ChatError::Auth(_)));
    }

    #[tokio::test]
    async fn test_http_status_mapping() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let body = "boom";
            let response = format!(
                "HTTP/1.1 500 Internal Server Error\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let api = api(&format!("http://{}", addr)).unwrap();
        let err = api.list_messages("c 1", 0, 30).await.unwrap_err();
        match err {
            ChatError::Http { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
