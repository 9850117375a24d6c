//! Line commands.
//!
//! A submitted line is either a slash command or a chat message:
//!
//! - `/join <room>`: enter a room
//! - `/leave`: leave the current room
//! - `/quit`: disconnect and exit
//! - anything else: send as a chat message

use chatwave_client::{RoomId, SessionEvent};
use thiserror::Error;

/// Parsed user command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Enter a room.
    Join(RoomId),
    /// Leave the current room.
    Leave,
    /// Disconnect and exit.
    Quit,
    /// Chat message.
    Say(String),
}

/// Line that looks like a command but is not one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// `/join` without a room
    #[error("usage: /join <room>")]
    MissingRoom,

    /// Unrecognised `/command`
    #[error("unknown command: /{0}")]
    Unknown(String),
}

impl UserCommand {
    /// Parse one submitted line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Say(line.to_string())));
        };

        let mut parts = rest.split_whitespace();
        let command = parts.next().unwrap_or_default();
        match command {
            "join" => {
                let room = parts.next().ok_or(CommandError::MissingRoom)?;
                Ok(Some(Self::Join(RoomId::new(room))))
            },
            "leave" => Ok(Some(Self::Leave)),
            "quit" | "exit" => Ok(Some(Self::Quit)),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    /// Session event for this command. `None` for [`UserCommand::Quit`],
    /// which the runtime handles itself.
    pub fn into_event<I>(self) -> Option<SessionEvent<I>> {
        match self {
            Self::Join(room) => Some(SessionEvent::Join { room }),
            Self::Leave => Some(SessionEvent::Leave),
            Self::Say(content) => Some(SessionEvent::SendMessage { content }),
            Self::Quit => None,
        }
    }
}
