//! STOMP 1.2 text frames.
//!
//! Layout on the wire:
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! One WebSocket text message carries one frame. Bare EOLs outside a frame are
//! heart-beats and decode to `None`.
//!
//! # Invariants
//!
//! - Header values are escaped (`\\`, `\n`, `\r`, `\c`) for every command
//!   except `CONNECT`, `STOMP` and `CONNECTED`, which STOMP 1.2 exempts.
//! - When a `content-length` header is present the body is exactly that many
//!   bytes and MUST be followed by NUL. Otherwise the body runs to the first
//!   NUL.
//! - Repeated headers keep every entry, but lookups return the first one.

use bytes::Bytes;

use crate::errors::{ProtocolError, Result};

/// Header carrying the body length in bytes.
pub const CONTENT_LENGTH: &str = "content-length";

/// STOMP command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client opens a session
    Connect,
    /// Alternative spelling of CONNECT
    Stomp,
    /// Server accepted the session
    Connected,
    /// Client publishes to a destination
    Send,
    /// Client registers interest in a destination
    Subscribe,
    /// Client withdraws a subscription
    Unsubscribe,
    /// Client closes the session
    Disconnect,
    /// Server delivers a frame for a subscription
    Message,
    /// Server acknowledges a receipt request
    Receipt,
    /// Server reports an error
    Error,
}

impl Command {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parse the command line of a frame.
    pub fn parse(line: &str) -> Option<Self> {
        Some(match line {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    /// Frame command
    pub command: Command,
    headers: Vec<(String, String)>,
    /// Raw body bytes (JSON for every frame this client exchanges)
    pub body: Bytes,
}

impl StompFrame {
    /// Create a frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: Bytes::new() }
    }

    /// `CONNECT` frame for the given virtual host and login.
    pub fn connect(host: &str, login: &str) -> Self {
        Self::new(Command::Connect)
            .with_header("accept-version", "1.2")
            .with_header("host", host)
            .with_header("login", login)
            .with_header("heart-beat", "0,0")
    }

    /// `SUBSCRIBE` frame.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe).with_header("id", id).with_header("destination", destination)
    }

    /// `UNSUBSCRIBE` frame.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    /// `SEND` frame with a JSON body.
    pub fn send(destination: &str, json: impl Into<Bytes>) -> Self {
        Self::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_body(json)
    }

    /// `DISCONNECT` frame.
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// Value of a header the caller cannot proceed without.
    pub fn required_header(&self, name: &'static str) -> Result<&str> {
        self.header(name).ok_or(ProtocolError::MissingHeader(name))
    }

    /// All headers in wire order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Body as UTF-8 text.
    pub fn body_str(&self) -> Result<&str> {
        Ok(std::str::from_utf8(&self.body)?)
    }

    /// Serialize to wire bytes, NUL-terminated.
    ///
    /// A `content-length` header is added for non-empty bodies unless the
    /// caller already set one.
    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        for (name, value) in &self.headers {
            push_header(&mut out, name, value, escape);
        }
        if !self.body.is_empty() && self.header(CONTENT_LENGTH).is_none() {
            push_header(&mut out, CONTENT_LENGTH, &self.body.len().to_string(), false);
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }

    /// Serialize to a `String` for text transports.
    pub fn encode_text(&self) -> Result<String> {
        String::from_utf8(self.encode()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Parse one frame.
    ///
    /// Returns `Ok(None)` for heart-beats (input made only of EOLs).
    pub fn decode(input: &[u8]) -> Result<Option<Self>> {
        let Some(start) = input.iter().position(|b| *b != b'\n' && *b != b'\r') else {
            return Ok(None);
        };
        let mut cursor = Cursor { buf: &input[start..], pos: 0 };

        let line = cursor.line()?;
        let command =
            Command::parse(line).ok_or_else(|| ProtocolError::UnknownCommand(line.to_string()))?;
        let escaped = command.escapes_headers();

        let mut headers = Vec::new();
        loop {
            let line = cursor.line()?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader { line: line.to_string() })?;
            if escaped {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let mut frame = Self { command, headers, body: Bytes::new() };
        let rest = &cursor.buf[cursor.pos..];

        let body = match frame.header(CONTENT_LENGTH) {
            Some(raw) => {
                let len: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::InvalidContentLength(raw.to_string()))?;
                if rest.get(len) != Some(&0) {
                    return Err(ProtocolError::MissingNul);
                }
                &rest[..len]
            },
            None => {
                let end = rest.iter().position(|b| *b == 0).ok_or(ProtocolError::MissingNul)?;
                &rest[..end]
            },
        };

        frame.body = Bytes::copy_from_slice(body);
        Ok(Some(frame))
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Next line without its EOL (`\n` or `\r\n`).
    fn line(&mut self) -> Result<&'a str> {
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.pos..];
        let nl = rest.iter().position(|b| *b == b'\n').ok_or(ProtocolError::UnexpectedEof)?;
        self.pos += nl + 1;

        let raw = rest[..nl].strip_suffix(b"\r").unwrap_or(&rest[..nl]);
        Ok(std::str::from_utf8(raw)?)
    }
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str, escape: bool) {
    if escape {
        out.extend_from_slice(escape_header(name).as_bytes());
        out.push(b':');
        out.extend_from_slice(escape_header(value).as_bytes());
    } else {
        out.extend_from_slice(name.as_bytes());
        out.push(b':');
        out.extend_from_slice(value.as_bytes());
    }
    out.push(b'\n');
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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

fn unescape_header(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
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
            _ => return Err(ProtocolError::InvalidEscape { value: raw.to_string() }),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_message_without_content_length() {
        let raw = b"MESSAGE\nsubscription:sub-0\ndestination:/topic/room/general\n\n{\"a\":1}\0";
        let frame = StompFrame::decode(raw).unwrap().unwrap();

        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("subscription"), Some("sub-0"));
        assert_eq!(frame.body_str().unwrap(), "{\"a\":1}");
    }

    #[test]
    fn decode_respects_content_length_with_embedded_nul() {
        let raw = b"MESSAGE\ncontent-length:3\n\na\0b\0";
        let frame = StompFrame::decode(raw).unwrap().unwrap();
        assert_eq!(&frame.body[..], b"a\0b");
    }

    #[test]
    fn decode_heartbeat_is_none() {
        assert_eq!(StompFrame::decode(b"\n").unwrap(), None);
        assert_eq!(StompFrame::decode(b"\r\n\n").unwrap(), None);
        assert_eq!(StompFrame::decode(b"").unwrap(), None);
    }

    #[test]
    fn decode_accepts_crlf_and_leading_heartbeats() {
        let raw = b"\n\nCONNECTED\r\nversion:1.2\r\n\r\n\0";
        let frame = StompFrame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.header("version"), Some("1.2"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn decode_rejects_unknown_command() {
        let err = StompFrame::decode(b"HELLO\n\n\0").unwrap_err();
        assert_eq!(err, ProtocolError::UnknownCommand("HELLO".into()));
    }

    #[test]
    fn decode_rejects_missing_nul() {
        assert_eq!(StompFrame::decode(b"MESSAGE\n\nbody").unwrap_err(), ProtocolError::MissingNul);
        assert_eq!(
            StompFrame::decode(b"MESSAGE\ncontent-length:10\n\nshort\0").unwrap_err(),
            ProtocolError::MissingNul
        );
    }

    #[test]
    fn decode_rejects_truncated_headers() {
        assert_eq!(
            StompFrame::decode(b"MESSAGE\nsubscription:1").unwrap_err(),
            ProtocolError::UnexpectedEof
        );
    }

    #[test]
    fn first_repeated_header_wins() {
        let raw = b"MESSAGE\nfoo:first\nfoo:second\n\n\0";
        let frame = StompFrame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.header("foo"), Some("first"));
        assert_eq!(frame.headers().count(), 2);
    }

    #[test]
    fn header_escaping_round_trips_except_for_connect() {
        let frame = StompFrame::new(Command::Send).with_header("note", "a:b\\c\nd");
        let wire = frame.encode();
        assert!(String::from_utf8_lossy(&wire).contains("note:a\\cb\\\\c\\nd\n"));
        let decoded = StompFrame::decode(&wire).unwrap().unwrap();
        assert_eq!(decoded.header("note"), Some("a:b\\c\nd"));

        let connected = StompFrame::decode(b"CONNECTED\nserver:x\\c\n\n\0").unwrap().unwrap();
        assert_eq!(connected.header("server"), Some("x\\c"));
    }

    #[test]
    fn invalid_escape_is_rejected() {
        let err = StompFrame::decode(b"MESSAGE\nfoo:bad\\t\n\n\0").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEscape { .. }));
    }

    #[test]
    fn send_adds_content_length() {
        let frame = StompFrame::send("/app/chat.send", "{}");
        let text = frame.encode_text().unwrap();
        assert_eq!(
            text,
            "SEND\ndestination:/app/chat.send\ncontent-type:application/json\ncontent-length:2\n\n{}\0"
        );
    }

    #[test]
    fn connect_frame_shape() {
        let text = StompFrame::connect("localhost", "alice").encode_text().unwrap();
        assert!(text.starts_with("CONNECT\naccept-version:1.2\nhost:localhost\nlogin:alice\n"));
        assert!(text.ends_with("\n\n\0"));
    }
}
