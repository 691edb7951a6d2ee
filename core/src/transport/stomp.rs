/// STOMP 1.2 frame codec (text frames only)
use crate::error::{ChatError, Result};
use std::fmt;

/// Protocol version advertised in CONNECT
pub const STOMP_VERSION: &str = "1.2";

/// Frame commands used by the chat session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        })
    }

    /// CONNECT/CONNECTED headers are sent verbatim
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body with its content headers
    pub fn json_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        let len = self.body.len().to_string();
        self.header("content-type", "application/json")
            .header("content-length", len)
    }

    /// First occurrence wins on repeated headers
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to the wire text, NUL-terminated
    pub fn to_text(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode every frame in one WebSocket text message.
    /// Bare EOLs between frames are heartbeats and produce nothing.
    pub fn decode_all(input: &str) -> Result<Vec<StompFrame>> {
        let mut frames = Vec::new();
        let mut rest = input;
        loop {
            rest = rest.trim_start_matches(|c: char| c == '\r' || c == '\n');
            if rest.is_empty() {
                break;
            }
            let (frame, consumed) = Self::decode_one(rest)?;
            frames.push(frame);
            rest = &rest[consumed..];
        }
        Ok(frames)
    }

    fn decode_one(input: &str) -> Result<(StompFrame, usize)> {
        let lf = input.find("\n\n").map(|i| (i, 2));
        let crlf = input.find("\r\n\r\n").map(|i| (i, 4));
        let (head_len, sep) = match (lf, crlf) {
            (Some(a), Some(b)) => a.min(b),
            (a, b) => a
                .or(b)
                .ok_or_else(|| ChatError::Protocol("frame has no header terminator".to_string()))?,
        };
        let head = &input[..head_len];
        let mut lines = head.lines();

        let command_line = lines.next().unwrap_or_default().trim_end_matches('\r');
        let command = Command::parse(command_line)
            .ok_or_else(|| ChatError::Protocol(format!("unknown command {:?}", command_line)))?;

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            let (k, v) = line
                .split_once(':')
                .ok_or_else(|| ChatError::Protocol(format!("malformed header {:?}", line)))?;
            if command.escapes_headers() {
                headers.push((unescape_header(k)?, unescape_header(v)?));
            } else {
                headers.push((k.to_string(), v.to_string()));
            }
        }

        let body_start = head.len() + sep;
        let remaining = &input[body_start..];
        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| ChatError::Protocol(format!("bad content-length {:?}", v)))
            })
            .transpose()?;

        let body_len = match content_length {
            Some(len) => {
                if remaining.len() < len || remaining.as_bytes().get(len) != Some(&0) {
                    return Err(ChatError::Protocol("body shorter than content-length".to_string()));
                }
                len
            }
            None => remaining
                .find('\0')
                .ok_or_else(|| ChatError::Protocol("frame is not NUL-terminated".to_string()))?,
        };
        let body = remaining
            .get(..body_len)
            .ok_or_else(|| ChatError::Protocol("content-length splits a character".to_string()))?
            .to_string();

        let frame = StompFrame {
            command,
            headers,
            body,
        };
        Ok((frame, body_start + body_len + 1))
    }
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ChatError::Protocol(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}
