/// STOMP session over a WebSocket (tokio-tungstenite)
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::transport::stomp::{Command, StompFrame, STOMP_VERSION};
use crate::transport::{EventSender, SessionId, Transport, TransportEvent};
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info, warn};

type SubscriptionMap = Arc<Mutex<HashMap<String, String>>>;

struct Session {
    id: SessionId,
    outbound: mpsc::UnboundedSender<Message>,
    /// subscription id -> destination it was opened for
    subscriptions: SubscriptionMap,
    next_sub: u64,
    closing: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// STOMP 1.2 client session on a single WebSocket connection
pub struct StompTransport {
    url: String,
    host: String,
    heartbeat: Duration,
    connect_timeout: Duration,
    session: Mutex<Option<Session>>,
    next_session: AtomicU64,
}

impl StompTransport {
    pub fn new(url: impl Into<String>, host: impl Into<String>) -> Self {
        let defaults = Config::default();
        Self {
            url: url.into(),
            host: host.into(),
            heartbeat: defaults.heartbeat_interval,
            connect_timeout: defaults.connect_timeout,
            session: Mutex::new(None),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.ws_url.clone(),
            host: config.stomp_host.clone(),
            heartbeat: config.heartbeat_interval,
            connect_timeout: config.connect_timeout,
            session: Mutex::new(None),
            next_session: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_message(&self, message: Message) -> Result<()> {
        let guard = self.lock();
        let session = guard
            .as_ref()
            .ok_or_else(|| ChatError::Transport("no open session".to_string()))?;
        session
            .outbound
            .send(message)
            .map_err(|_| ChatError::Transport("session writer has stopped".to_string()))
    }

    fn send_frame(&self, frame: &StompFrame) -> Result<()> {
        self.send_message(Message::Text(frame.to_text()))
    }

    async fn shutdown(session: Session) {
        session.closing.store(true, Ordering::SeqCst);
        let disconnect = StompFrame::new(Command::Disconnect);
        let _ = session.outbound.send(Message::Text(disconnect.to_text()));

        let Session {
            id,
            outbound,
            reader,
            writer,
            ..
        } = session;
        // Writer drains what is queued, then closes the socket
        drop(outbound);
        if timeout(Duration::from_secs(1), writer).await.is_err() {
            debug!("WebSocket writer did not finish in time");
        }
        reader.abort();
        info!("STOMP session {} closed", id);
    }
}

impl Drop for StompTransport {
    fn drop(&mut self) {
        if let Some(session) = self.lock().take() {
            session.reader.abort();
        }
    }
}

#[async_trait]
impl Transport for StompTransport {
    async fn open(&self, token: &str, events: EventSender) -> Result<SessionId> {
        // Never keep two sessions alive
        self.close().await;

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| {
                ChatError::Transport(format!("Failed to build WebSocket request: {}", e))
            })?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ChatError::Auth("token contains invalid header characters".to_string()))?;
        request.headers_mut().insert("Authorization", bearer);

        debug!("Opening WebSocket to {}", self.url);
        let (ws, _) = timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| ChatError::Timeout(format!("WebSocket connect to {}", self.url)))?
            .map_err(|e| match e {
                WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
                    ChatError::Auth(format!("WebSocket rejected with {}", response.status()))
                }
                other => ChatError::Transport(format!("WebSocket connect failed: {}", other)),
            })?;

        let (mut sink, mut stream) = ws.split();

        let heartbeat_ms = self.heartbeat.as_millis().to_string();
        let connect = StompFrame::new(Command::Connect)
            .header("accept-version", STOMP_VERSION)
            .header("host", self.host.as_str())
            .header("heart-beat", format!("{},{}", heartbeat_ms, heartbeat_ms))
            .header("Authorization", format!("Bearer {}", token));
        sink.send(Message::Text(connect.to_text()))
            .await
            .map_err(|e| ChatError::Transport(format!("Failed to send CONNECT: {}", e)))?;

        let connected = timeout(self.connect_timeout, wait_for_connected(&mut stream))
            .await
            .map_err(|_| ChatError::Timeout("STOMP CONNECTED frame".to_string()))??;
        info!(
            "STOMP session established (version {}, server {})",
            connected.get("version").unwrap_or("?"),
            connected.get("server").unwrap_or("?")
        );

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let subscriptions: SubscriptionMap = Arc::new(Mutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let subscriptions = subscriptions.clone();
            let closing = closing.clone();
            tokio::spawn(async move {
                let reason = read_loop(&mut stream, &subscriptions, &events).await;
                if closing.load(Ordering::SeqCst) {
                    debug!("Session reader stopped after close: {}", reason);
                } else {
                    let _ = events.send(TransportEvent::Closed { reason });
                }
            })
        };

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        *self.lock() = Some(Session {
            id,
            outbound,
            subscriptions,
            next_sub: 0,
            closing,
            reader,
            writer,
        });
        Ok(id)
    }

    fn publish(&self, destination: &str, body: &str) -> Result<()> {
        let frame = StompFrame::new(Command::Send)
            .header("destination", destination)
            .json_body(body);
        self.send_frame(&frame)
    }

    fn subscribe(&self, destination: &str) -> Result<()> {
        let mut guard = self.lock();
        let session = guard
            .as_mut()
            .ok_or_else(|| ChatError::Transport("no open session".to_string()))?;

        let id = format!("sub-{}", session.next_sub);
        session.next_sub += 1;
        session
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), destination.to_string());

        let frame = StompFrame::new(Command::Subscribe)
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", "auto");
        session
            .outbound
            .send(Message::Text(frame.to_text()))
            .map_err(|_| ChatError::Transport("session writer has stopped".to_string()))?;
        debug!("Subscribed {} as {}", destination, id);
        Ok(())
    }

    fn unsubscribe_all(&self) {
        let guard = self.lock();
        let Some(session) = guard.as_ref() else {
            return;
        };
        let ids: Vec<String> = session
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            let frame = StompFrame::new(Command::Unsubscribe).header("id", id);
            let _ = session.outbound.send(Message::Text(frame.to_text()));
        }
    }

    fn heartbeat(&self) -> Result<()> {
        self.send_message(Message::Text("\n".to_string()))
    }

    async fn close(&self) {
        let session = self.lock().take();
        if let Some(session) = session {
            Self::shutdown(session).await;
        }
    }

    async fn close_session(&self, session: SessionId) {
        let current = {
            let mut guard = self.lock();
            if guard.as_ref().map(|open| open.id) == Some(session) {
                guard.take()
            } else {
                None
            }
        };
        match current {
            Some(open) => Self::shutdown(open).await,
            None => debug!("Session {} already replaced; nothing to close", session),
        }
    }

    fn is_open(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|s| !s.outbound.is_closed() && !s.reader.is_finished())
            .unwrap_or(false)
    }
}

async fn wait_for_connected<S>(stream: &mut S) -> Result<StompFrame>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(item) = stream.next().await {
        match item {
            Ok(Message::Text(text)) => {
                for frame in StompFrame::decode_all(&text)? {
                    match frame.command {
                        Command::Connected => return Ok(frame),
                        Command::Error => {
                            let message = frame.get("message").unwrap_or(&frame.body).to_string();
                            return Err(ChatError::Auth(format!(
                                "STOMP CONNECT refused: {}",
                                message
                            )));
                        }
                        other => debug!("Ignoring {} before CONNECTED", other),
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                return Err(ChatError::Transport(format!(
                    "socket closed during handshake: {:?}",
                    frame
                )))
            }
            Ok(_) => {}
            Err(e) => return Err(ChatError::Transport(format!("handshake read failed: {}", e))),
        }
    }
    Err(ChatError::Transport("socket ended during handshake".to_string()))
}

/// Pump inbound frames until the socket ends. Returns why it ended.
async fn read_loop<S>(
    stream: &mut S,
    subscriptions: &SubscriptionMap,
    events: &EventSender,
) -> String
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    'read: loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let frames = match StompFrame::decode_all(&text) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!("Dropping undecodable STOMP payload: {}", e);
                        continue;
                    }
                };
                for frame in frames {
                    match frame.command {
                        Command::Message => {
                            let destination = frame
                                .get("subscription")
                                .and_then(|id| {
                                    subscriptions
                                        .lock()
                                        .unwrap_or_else(PoisonError::into_inner)
                                        .get(id)
                                        .cloned()
                                })
                                .or_else(|| frame.get("destination").map(String::from));
                            match destination {
                                Some(destination) => {
                                    let event = TransportEvent::Frame {
                                        destination,
                                        body: frame.body,
                                    };
                                    if events.send(event).is_err() {
                                        break 'read "event receiver dropped".to_string();
                                    }
                                }
                                None => warn!("MESSAGE frame without destination dropped"),
                            }
                        }
                        Command::Error => {
                            let message = frame.get("message").unwrap_or(&frame.body).to_string();
                            break 'read format!("server error: {}", message);
                        }
                        other => debug!("Received {} frame", other),
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => break format!("socket closed: {:?}", frame),
            Some(Ok(_)) => {}
            Some(Err(e)) => break format!("socket error: {}", e),
            None => break "socket stream ended".to_string(),
        }
    }
}
