//! STOMP 1.2 frame codec.
//!
//! One frame per WebSocket message:
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) except in `CONNECT`
//! and `CONNECTED` frames. A message made only of line breaks is a heartbeat.

use chat_core::error::{ChatError, ChatResult};

/// STOMP frame commands used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompCommand {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl StompCommand {
    /// Parse a command line.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONNECT" | "STOMP" => Some(Self::Connect),
            "CONNECTED" => Some(Self::Connected),
            "SEND" => Some(Self::Send),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "MESSAGE" => Some(Self::Message),
            "RECEIPT" => Some(Self::Receipt),
            "ERROR" => Some(Self::Error),
            "DISCONNECT" => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// The command line for this frame.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: StompCommand,
    /// Headers in wire order. Repeated names are allowed; the first wins.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    /// Create a frame with no headers and an empty body.
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Best human-readable description of an ERROR frame.
    pub fn error_message(&self) -> String {
        match self.get_header("message") {
            Some(message) if !message.is_empty() => message.to_string(),
            _ if !self.body.trim().is_empty() => self.body.trim().to_string(),
            _ => "unspecified broker error".to_string(),
        }
    }

    /// Serialize to the wire form. Adds `content-length` when there is a body.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get_header("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame. Leading line breaks (heartbeats) are skipped.
    pub fn decode(raw: &str) -> ChatResult<Self> {
        let raw = raw.trim_start_matches(['\r', '\n']);
        let (head, rest) = split_head(raw)
            .ok_or_else(|| ChatError::Protocol("stomp frame without header terminator".into()))?;

        let mut lines = head.lines();
        let command_line = lines
            .next()
            .map(|l| l.trim_end_matches('\r'))
            .unwrap_or_default();
        let command = StompCommand::parse(command_line)
            .ok_or_else(|| ChatError::Protocol(format!("unknown stomp command: {command_line:?}")))?;

        let unescape = command.escapes_headers();
        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ChatError::Protocol(format!("malformed stomp header: {line:?}")))?;
            if unescape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let frame = Self {
            command,
            headers,
            body: String::new(),
        };

        let body = match frame.get_header("content-length") {
            Some(len) => {
                let len: usize = len
                    .trim()
                    .parse()
                    .map_err(|_| ChatError::Protocol(format!("bad content-length: {len:?}")))?;
                rest.get(..len)
                    .ok_or_else(|| ChatError::Protocol("stomp body shorter than content-length".into()))?
            }
            None => rest.split('\0').next().unwrap_or_default(),
        };

        Ok(Self {
            body: body.to_string(),
            ..frame
        })
    }
}

/// Split at the first empty line: headers before it, body after it.
/// Either EOL style may be used, line by line.
fn split_head(raw: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in raw.split_inclusive('\n') {
        let end = offset + line.len();
        if offset > 0 && line.ends_with('\n') && line.trim_end_matches(['\r', '\n']).is_empty() {
            return Some((&raw[..offset], &raw[end..]));
        }
        offset = end;
    }
    None
}

/// Whether a WebSocket text message is a STOMP heartbeat.
pub fn is_heartbeat(raw: &str) -> bool {
    raw.chars().all(|c| c == '\n' || c == '\r')
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

fn unescape_header(value: &str) -> ChatResult<String> {
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
                    "invalid stomp header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_send_frame() {
        let frame = StompFrame::new(StompCommand::Send)
            .header("destination", "/app/chat.send")
            .header("content-type", "application/json")
            .body(r#"{"type":"CHAT"}"#);

        assert_eq!(
            frame.encode(),
            "SEND\ndestination:/app/chat.send\ncontent-type:application/json\ncontent-length:15\n\n{\"type\":\"CHAT\"}\0"
        );
    }

    #[test]
    fn test_decode_message_frame() {
        let raw = "MESSAGE\nsubscription:sub-0\nmessage-id:7\ndestination:/user/u1/queue/messages\n\n{\"a\":1}\0";
        let frame = StompFrame::decode(raw).unwrap();
        assert_eq!(frame.command, StompCommand::Message);
        assert_eq!(frame.get_header("subscription"), Some("sub-0"));
        assert_eq!(frame.get_header("destination"), Some("/user/u1/queue/messages"));
        assert_eq!(frame.body, "{\"a\":1}");
    }

    #[test]
    fn test_decode_respects_content_length() {
        let raw = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frame = StompFrame::decode(raw).unwrap();
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn test_decode_crlf_and_leading_heartbeats() {
        let raw = "\n\nCONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0";
        let frame = StompFrame::decode(raw).unwrap();
        assert_eq!(frame.command, StompCommand::Connected);
        assert_eq!(frame.get_header("version"), Some("1.2"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn test_crlf_frame_body_may_contain_blank_lines() {
        let raw = "MESSAGE\r\ndestination:/user/me/queue/messages\r\n\r\n{\"a\":\"x\n\ny\"}\0";
        let frame = StompFrame::decode(raw).unwrap();
        assert_eq!(frame.get_header("destination"), Some("/user/me/queue/messages"));
        assert_eq!(frame.body, "{\"a\":\"x\n\ny\"}");

        let raw = "MESSAGE\ndestination:/d\n\nline one\r\n\r\nline two\0";
        assert_eq!(StompFrame::decode(raw).unwrap().body, "line one\r\n\r\nline two");
    }

    #[test]
    fn test_header_escaping() {
        let frame = StompFrame::new(StompCommand::Send).header("note", "a:b\nc\\d");
        let encoded = frame.encode();
        assert!(encoded.contains("note:a\\cb\\nc\\\\d\n"));

        let decoded = StompFrame::decode(&encoded).unwrap();
        assert_eq!(decoded.get_header("note"), Some("a:b\nc\\d"));
    }

    #[test]
    fn test_connect_headers_are_not_escaped() {
        let frame = StompFrame::new(StompCommand::Connect).header("host", "chat.example.com:443");
        assert!(frame.encode().contains("host:chat.example.com:443\n"));
    }

    #[test]
    fn test_first_repeated_header_wins() {
        let raw = "MESSAGE\nfoo:first\nfoo:second\n\n\0";
        let frame = StompFrame::decode(raw).unwrap();
        assert_eq!(frame.get_header("foo"), Some("first"));
    }

    #[test]
    fn test_error_message() {
        let raw = "ERROR\nmessage:Invalid token\n\nexpired\0";
        let frame = StompFrame::decode(raw).unwrap();
        assert_eq!(frame.error_message(), "Invalid token");

        let frame = StompFrame::new(StompCommand::Error).body("  denied ");
        assert_eq!(frame.error_message(), "denied");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(StompFrame::decode("GARBAGE\n\n\0").is_err());
        assert!(StompFrame::decode("MESSAGE\nno-terminator").is_err());
        assert!(StompFrame::decode("MESSAGE\nbad header\n\n\0").is_err());
        assert!(StompFrame::decode("MESSAGE\ncontent-length:99\n\nshort\0").is_err());
        assert!(StompFrame::decode("MESSAGE\nx:\\q\n\n\0").is_err());
    }

    #[test]
    fn test_heartbeat_detection() {
        assert!(is_heartbeat("\n"));
        assert!(is_heartbeat("\r\n"));
        assert!(!is_heartbeat("MESSAGE\n\n\0"));
    }
}
