//! Local identity.

use std::fmt;

use thiserror::Error;

/// Shortest accepted username, in characters.
pub const MIN_USERNAME_LEN: usize = 2;

/// Username rejected at session start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Nothing left after trimming whitespace
    #[error("username is empty")]
    Empty,

    /// Too short after trimming
    #[error("username must be at least {min} characters, got {len}")]
    TooShort {
        /// Characters supplied
        len: usize,
        /// Characters required
        min: usize,
    },
}

/// Username of the local user. Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    username: String,
}

impl Identity {
    /// Validate and wrap a username. Surrounding whitespace is trimmed.
    pub fn new(username: &str) -> Result<Self, IdentityError> {
        let username = username.trim();
        let len = username.chars().count();
        if len == 0 {
            return Err(IdentityError::Empty);
        }
        if len < MIN_USERNAME_LEN {
            return Err(IdentityError::TooShort { len, min: MIN_USERNAME_LEN });
        }
        Ok(Self { username: username.to_string() })
    }

    /// The username.
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}
