/// Transport boundary: one full-duplex session carrying named destinations
pub mod stomp;
pub mod websocket;

pub use stomp::{Command, StompFrame, STOMP_VERSION};
pub use websocket::StompTransport;

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Raw lifecycle and traffic events raised by an open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A frame arrived on a subscribed destination
    Frame { destination: String, body: String },
    /// The session ended without `close` being called
    Closed { reason: String },
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Identifies one opened session of a transport
pub type SessionId = u64;

/// A publish/subscribe session over a single physical socket.
///
/// `publish`, `subscribe` and `heartbeat` only hand work to the session and
/// return immediately; a successful return means "accepted for send".
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session authenticated with `token`, replacing any open one.
    /// Inbound traffic for this session is delivered on `events` until it ends.
    async fn open(&self, token: &str, events: EventSender) -> Result<SessionId>;

    fn publish(&self, destination: &str, body: &str) -> Result<()>;

    fn subscribe(&self, destination: &str) -> Result<()>;

    fn unsubscribe_all(&self);

    fn heartbeat(&self) -> Result<()>;

    /// Tear the session down. No `Closed` event is raised for an explicit close.
    async fn close(&self);

    /// Close the session only if it is still `session`
    async fn close_session(&self, session: SessionId);

    fn is_open(&self) -> bool;
}
