//! Line renderer.
//!
//! Turns render events into plain text lines. Chat lines carry the server
//! time as `[HH:MM]`; system lines are prefixed with `*`. In
//! [`Markup::Html`] mode every line is entity-escaped so the output can be
//! embedded in an HTML page; message text arrives already decoded, so it is
//! escaped exactly once.

use std::io::{self, Write};

use chatwave_client::{ConnectionState, DisplayMessage, RenderEvent, SystemKind};
use chatwave_proto::escape::escape_html;
use chrono::NaiveDateTime;

/// Output encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Markup {
    /// Text as displayed
    #[default]
    Plain,
    /// HTML-escaped text
    Html,
}

/// Writes one line per visible render event.
pub struct LineRenderer<W> {
    out: W,
    markup: Markup,
}

impl<W: Write> LineRenderer<W> {
    /// Plain-text renderer writing to `out`.
    pub fn new(out: W) -> Self {
        Self::with_markup(out, Markup::Plain)
    }

    /// Renderer writing to `out` in the given encoding.
    pub fn with_markup(out: W, markup: Markup) -> Self {
        Self { out, markup }
    }

    /// Underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Write `event`, if it has a visible form.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn render(&mut self, event: &RenderEvent) -> io::Result<()> {
        let Some(line) = format_event(event) else {
            return Ok(());
        };
        match self.markup {
            Markup::Plain => writeln!(self.out, "{line}")?,
            Markup::Html => writeln!(self.out, "{}", escape_html(&line))?,
        }
        self.out.flush()
    }
}

fn format_event(event: &RenderEvent) -> Option<String> {
    Some(match event {
        RenderEvent::ConnectionStatus(ConnectionState::Connecting) => "* connecting".to_string(),
        RenderEvent::ConnectionStatus(ConnectionState::Connected) => "* connected".to_string(),
        RenderEvent::ConnectionStatus(ConnectionState::Disconnected) => {
            "* disconnected".to_string()
        },
        RenderEvent::RoomEntered { name, .. } => format!("== {name} =="),
        RenderEvent::RoomLeft { room } => format!("* left {room}"),
        RenderEvent::HistoryHeader { count } => format!("-- {count} earlier messages --"),
        RenderEvent::Message(message) => format_message(message),
        RenderEvent::Typing(Some(indicator)) => format!("   {indicator}"),
        RenderEvent::Presence { users, count, .. } => {
            format!("* {count} online: {}", users.join(", "))
        },
        RenderEvent::OnlineCount(count) => format!("* {count} users online"),
        RenderEvent::MessagesCleared | RenderEvent::Typing(None) | RenderEvent::RoomBadge { .. } => {
            return None;
        },
    })
}

fn format_message(message: &DisplayMessage) -> String {
    match message {
        DisplayMessage::Chat { sender, content, timestamp, own } => {
            let marker = if *own { ">" } else { " " };
            format!("{}{marker}{sender}: {content}", clock(*timestamp))
        },
        DisplayMessage::System { kind, content, timestamp } => {
            let marker = match kind {
                SystemKind::Join => "+",
                SystemKind::Leave => "-",
                SystemKind::Notice => "*",
            };
            format!("{}{marker} {content}", clock(*timestamp))
        },
    }
}

fn clock(timestamp: Option<NaiveDateTime>) -> String {
    timestamp.map(|t| format!("[{}] ", t.format("%H:%M"))).unwrap_or_default()
}
