/// Channel router: subscribes the inbound queues and fans parsed payloads out to handlers
use crate::chat_types::{ChatMessage, PresenceEvent, ReadReceiptEvent, TypingEvent};
use crate::config::Destinations;
use crate::error::Result;
use crate::transport::Transport;
use crate::utils::{EventEmitter, HandlerId};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Inbound logical channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Messages,
    Typing,
    ReadReceipts,
    Presence,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Messages,
        Channel::Typing,
        Channel::ReadReceipts,
        Channel::Presence,
    ];

    pub fn destination<'a>(&self, destinations: &'a Destinations) -> &'a str {
        match self {
            Channel::Messages => &destinations.inbox_messages,
            Channel::Typing => &destinations.inbox_typing,
            Channel::ReadReceipts => &destinations.inbox_read_receipts,
            Channel::Presence => &destinations.inbox_presence,
        }
    }
}

pub struct ChannelRouter {
    destinations: Destinations,
    messages: EventEmitter<ChatMessage>,
    typing: EventEmitter<TypingEvent>,
    read_receipts: EventEmitter<ReadReceiptEvent>,
    presence: EventEmitter<PresenceEvent>,
    dropped: AtomicU64,
}

impl ChannelRouter {
    pub fn new(destinations: Destinations) -> Self {
        Self {
            destinations,
            messages: EventEmitter::new("message"),
            typing: EventEmitter::new("typing"),
            read_receipts: EventEmitter::new("read-receipt"),
            presence: EventEmitter::new("presence"),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn on_message(&self, f: impl Fn(&ChatMessage) + Send + Sync + 'static) -> HandlerId {
        self.messages.subscribe(f)
    }

    pub fn on_typing(&self, f: impl Fn(&TypingEvent) + Send + Sync + 'static) -> HandlerId {
        self.typing.subscribe(f)
    }

    pub fn on_read_receipt(
        &self,
        f: impl Fn(&ReadReceiptEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.read_receipts.subscribe(f)
    }

    pub fn on_presence(&self, f: impl Fn(&PresenceEvent) + Send + Sync + 'static) -> HandlerId {
        self.presence.subscribe(f)
    }

    pub fn remove_handler(&self, channel: Channel, id: HandlerId) -> bool {
        match channel {
            Channel::Messages => self.messages.unsubscribe(id),
            Channel::Typing => self.typing.unsubscribe(id),
            Channel::ReadReceipts => self.read_receipts.unsubscribe(id),
            Channel::Presence => self.presence.unsubscribe(id),
        }
    }

    pub fn channel_for(&self, destination: &str) -> Option<Channel> {
        Channel::ALL
            .into_iter()
            .find(|c| c.destination(&self.destinations) == destination)
    }

    /// Open the four inbound subscriptions on a freshly opened session
    pub fn subscribe_all(&self, transport: &dyn Transport) -> Result<()> {
        for channel in Channel::ALL {
            transport.subscribe(channel.destination(&self.destinations))?;
        }
        debug!("Subscribed {} inbound channels", Channel::ALL.len());
        Ok(())
    }

    /// Parse one inbound frame and hand it to every handler of its channel.
    /// Returns how many handlers completed.
    pub fn dispatch(&self, destination: &str, body: &str) -> usize {
        let Some(channel) = self.channel_for(destination) else {
            debug!("Frame for unrouted destination {} dropped", destination);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return 0;
        };

        match channel {
            Channel::Messages => self.parse_and_emit(channel, body, &self.messages),
            Channel::Typing => self.parse_and_emit(channel, body, &self.typing),
            Channel::ReadReceipts => self.parse_and_emit(channel, body, &self.read_receipts),
            Channel::Presence => self.parse_and_emit(channel, body, &self.presence),
        }
    }

    /// Frames that could not be routed or parsed
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn parse_and_emit<T: DeserializeOwned>(
        &self,
        channel: Channel,
        body: &str,
        emitter: &EventEmitter<T>,
    ) -> usize {
        match serde_json::from_str::<T>(body) {
            Ok(event) => emitter.emit(&event),
            Err(e) => {
                warn!("Malformed {:?} frame dropped: {}", channel, e);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_channel_lookup() {
        let router = ChannelRouter::new(Destinations::default());
        assert_eq!(router.channel_for("/user/queue/typing"), Some(Channel::Typing));
        assert_eq!(router.channel_for("/user/queue/presence"), Some(Channel::Presence));
        assert_eq!(router.channel_for("/topic/other"), None);
    }

    #[test]
    fn test_typing_dispatch_and_drop() {
        let router = ChannelRouter::new(Destinations::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        router.on_typing(move |e| s.lock().unwrap().push(e.clone()));

        let ran = router.dispatch(
            "/user/queue/typing",
            r#"{"conversationId":"c1","userId":"b","isTyping":true}"#,
        );
        assert_eq!(ran, 1);
        assert_eq!(seen.lock().unwrap()[0].user_id, "b");

        assert_eq!(router.dispatch("/user/queue/typing", "not json"), 0);
        assert_eq!(router.dispatch("/nowhere", "{}"), 0);
        assert_eq!(router.dropped_frames(), 2);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
