/// ChatSync - real-time chat synchronization engine
///
/// Keeps one STOMP-over-WebSocket session to the chat backend alive with
/// backoff reconnects, routes its inbound channels (messages, typing, read
/// receipts, presence) into an in-memory conversation store, and delivers
/// outbound intents socket-first with a REST fallback.

pub mod error;
pub mod config;
pub mod identity;
pub mod chat_types;
pub mod utils;
pub mod transport;
pub mod connection;
pub mod router;
pub mod store;
pub mod delivery;
pub mod rest;
pub mod collaborators;
pub mod engine;

pub use error::{ChatError, Result};
pub use config::{Config, Destinations, SentConfirmation};
pub use connection::{ConnectionManager, ConnectionState};
pub use delivery::DeliveryCoordinator;
pub use engine::ChatEngine;
pub use identity::{FileTokenStore, StaticTokenStore, TokenStore, UserIdentity};
pub use rest::{ChatApi, HttpChatApi};
pub use router::{Channel, ChannelRouter};
pub use store::{ConversationStore, StoreChange};
pub use transport::{StompTransport, Transport, TransportEvent};
