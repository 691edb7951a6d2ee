/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws";
const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";

/// When a message published over the socket counts as `Sent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentConfirmation {
    /// Wait for the server to echo the message back on the inbox queue
    ServerEcho,
    /// Trust the local publish
    Optimistic,
}

/// Logical destinations multiplexed over the transport session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destinations {
    pub send: String,
    pub typing: String,
    pub read: String,
    pub inbox_messages: String,
    pub inbox_typing: String,
    pub inbox_read_receipts: String,
    pub inbox_presence: String,
}

impl Default for Destinations {
    fn default() -> Self {
        Self {
            send: "/app/chat.send".to_string(),
            typing: "/app/chat.typing".to_string(),
            read: "/app/chat.read".to_string(),
            inbox_messages: "/user/queue/messages".to_string(),
            inbox_typing: "/user/queue/typing".to_string(),
            inbox_read_receipts: "/user/queue/read-receipt".to_string(),
            inbox_presence: "/user/queue/presence".to_string(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket endpoint carrying the STOMP session
    pub ws_url: String,

    /// Base URL of the chat REST API
    pub api_base_url: String,

    /// Where the bearer token is persisted
    pub token_path: Option<PathBuf>,

    /// Virtual host sent in the STOMP CONNECT frame
    pub stomp_host: String,

    /// Heartbeat interval
    pub heartbeat_interval: Duration,

    /// Transport handshake timeout
    pub connect_timeout: Duration,

    /// First reconnect delay, doubled per attempt
    pub reconnect_base_delay: Duration,

    /// Upper bound for a single reconnect delay
    pub reconnect_max_delay: Duration,

    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,

    /// How long a typing indicator lives without a refresh
    pub typing_ttl: Duration,

    /// How long a socket-sent message may wait for its echo
    pub ack_timeout: Duration,

    pub sent_confirmation: SentConfirmation,

    /// Page size for history and conversation list requests
    pub page_size: u32,

    pub destinations: Destinations,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_base_url: DEFAULT_API_URL.to_string(),
            token_path: None,
            stomp_host: "localhost".to_string(),
            heartbeat_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(30_000),
            max_reconnect_attempts: 5,
            typing_ttl: Duration::from_millis(3000),
            ack_timeout: Duration::from_secs(10),
            sent_confirmation: SentConfirmation::ServerEcho,
            page_size: 30,
            destinations: Destinations::default(),
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 3 {
            return Err(ChatError::Config(format!(
                "Usage: {} <ws_url> <api_url> [--token-file <path>] [--host <host>] [--page-size <n>] [--optimistic-sent]",
                args.first().map(String::as_str).unwrap_or("chatsync")
            )));
        }

        let mut config = Config {
            ws_url: args[1].clone(),
            api_base_url: args[2].trim_end_matches('/').to_string(),
            ..Default::default()
        };

        let mut i = 3;
        while i < args.len() {
            match args[i].as_str() {
                "--token-file" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--token-file requires a path argument".to_string())
                    })?;
                    config.token_path = Some(PathBuf::from(path));
                    i += 2;
                }
                "--host" => {
                    let host = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--host requires a value".to_string())
                    })?;
                    config.stomp_host = host.clone();
                    i += 2;
                }
                "--page-size" => {
                    let n = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--page-size requires a number".to_string())
                    })?;
                    config.page_size = n.parse::<u32>().map_err(|_| {
                        ChatError::Config("--page-size must be a positive number".to_string())
                    })?;
                    i += 2;
                }
                "--optimistic-sent" => {
                    config.sent_confirmation = SentConfirmation::Optimistic;
                    i += 1;
                }
                other => {
                    return Err(ChatError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(url) = std::env::var("CHATSYNC_WS_URL") {
            config.ws_url = url;
        }
        if let Ok(url) = std::env::var("CHATSYNC_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(path) = std::env::var("CHATSYNC_TOKEN_FILE") {
            config.token_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(ChatError::Config(format!(
                "WebSocket URL must start with ws:// or wss://, got {}",
                self.ws_url
            )));
        }
        // Same rule as HttpChatApi::new: TLS is terminated in front of the API
        if !self.api_base_url.starts_with("http://") {
            return Err(ChatError::Config(format!(
                "REST client needs an http:// base URL, got {}",
                self.api_base_url
            )));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ChatError::Config("max_reconnect_attempts must be at least 1".to_string()));
        }
        if self.typing_ttl.is_zero() {
            return Err(ChatError::Config("typing_ttl must be non-zero".to_string()));
        }
        if self.page_size == 0 {
            return Err(ChatError::Config("page_size must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Backoff delay before reconnect attempt number `attempt` (0-based)
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.reconnect_base_delay
            .checked_mul(factor)
            .unwrap_or(self.reconnect_max_delay)
            .min(self.reconnect_max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = Config::default();
        let delays: Vec<u64> = (0..7)
            .map(|n| config.reconnect_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
        assert_eq!(config.reconnect_delay(40), Duration::from_millis(30_000));
    }

    #[test]
    fn test_from_args_flags() {
        let config = Config::from_args(&args(&[
            "chatsync",
            "ws://localhost:9000/ws",
            "http://localhost:9000/",
            "--token-file",
            "/tmp/token",
            "--page-size",
            "50",
            "--optimistic-sent",
        ]))
        .unwrap();

        assert_eq!(config.ws_url, "ws://localhost:9000/ws");
        assert_eq!(config.api_base_url, "http://localhost:9000");
        assert_eq!(config.token_path, Some(PathBuf::from("/tmp/token")));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.sent_confirmation, SentConfirmation::Optimistic);
    }

    #[test]
    fn test_from_args_rejects_bad_input() {
        assert!(Config::from_args(&args(&["chatsync"])).is_err());
        assert!(Config::from_args(&args(&["chatsync", "http://x", "http://y"])).is_err());
        assert!(Config::from_args(&args(&["chatsync", "ws://x", "http://y", "--bogus"])).is_err());
        assert!(
            Config::from_args(&args(&["chatsync", "ws://x", "http://y", "--page-size"])).is_err()
        );
    }

    #[test]
    fn test_validate_limits() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.max_reconnect_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_https_api_url() {
        let config = Config {
            api_base_url: "https://api.example.com".to_string(),
            ..Config::default()
        };
        match config.validate() {
            Err(ChatError::Config(message)) => {
                assert!(message.contains("http:// base URL"), "{}", message)
            }
            other => panic!("expected a config error, got {:?}", other),
        }

        assert!(Config::from_args(&args(&["chatsync", "wss://x/ws", "https://y"])).is_err());
    }
}
