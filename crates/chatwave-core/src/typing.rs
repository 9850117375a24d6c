//! Typing indicator state.
//!
//! Tracks who is typing in the current room and debounces the local user's
//! own typing signal.
//!
//! # Remote signals
//!
//! Each `typing:true` inserts or refreshes an entry that expires after the idle
//! timeout unless refreshed again. `typing:false` removes it at once. Entries
//! keep first-signal order so the indicator text is stable while the same
//! people keep typing.
//!
//! # Local signal
//!
//! Only edges produce traffic. The first keystroke emits `typing:true` and arms
//! an idle timer; further keystrokes re-arm the timer silently. When the timer
//! fires, or the input is emptied, one `typing:false` is emitted.

use std::time::Duration;

use crate::{
    env::Moment,
    timer::{TimerId, TimerService},
};

/// Inactivity after which a typing state expires.
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_millis(2500);

#[derive(Debug, Clone, PartialEq, Eq)]
enum TypingTimer {
    Remote(String),
    LocalIdle,
}

#[derive(Debug, Clone)]
struct TypingEntry<I> {
    username: String,
    expires_at: I,
    timer: TimerId,
}

/// Result of [`TypingAggregator::poll_timers`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypingExpiry {
    /// Remote users whose entry expired
    pub expired: Vec<String>,
    /// Local typing went idle; a `typing:false` must be published
    pub local_stopped: bool,
}

impl TypingExpiry {
    /// Whether anything happened.
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && !self.local_stopped
    }
}

/// Typing state for the current room.
#[derive(Debug, Clone)]
pub struct TypingAggregator<I> {
    local_username: String,
    idle_timeout: Duration,
    timers: TimerService<TypingTimer, I>,
    entries: Vec<TypingEntry<I>>,
    local_typing: bool,
    local_timer: Option<TimerId>,
}

impl<I: Moment> TypingAggregator<I> {
    /// Create an empty aggregator. Signals from `local_username` are ignored
    /// on the remote path.
    pub fn new(local_username: impl Into<String>, idle_timeout: Duration) -> Self {
        Self {
            local_username: local_username.into(),
            idle_timeout,
            timers: TimerService::new(),
            entries: Vec::new(),
            local_typing: false,
            local_timer: None,
        }
    }

    /// Apply a remote typing signal. Returns `true` if the set of typing users
    /// changed.
    pub fn observe_remote(&mut self, username: &str, typing: bool, now: I) -> bool {
        if username == self.local_username {
            return false;
        }

        let position = self.entries.iter().position(|e| e.username == username);
        match (typing, position) {
            (true, Some(index)) => {
                let entry = &mut self.entries[index];
                self.timers.cancel(entry.timer);
                entry.expires_at = now + self.idle_timeout;
                entry.timer = self
                    .timers
                    .schedule(TypingTimer::Remote(username.to_string()), entry.expires_at);
                false
            },
            (true, None) => {
                let expires_at = now + self.idle_timeout;
                let timer = self.timers.schedule(TypingTimer::Remote(username.to_string()), expires_at);
                self.entries.push(TypingEntry { username: username.to_string(), expires_at, timer });
                true
            },
            (false, Some(index)) => {
                let entry = self.entries.remove(index);
                self.timers.cancel(entry.timer);
                true
            },
            (false, None) => false,
        }
    }

    /// Local input changed. Returns the signal to publish, if any.
    pub fn local_input_changed(&mut self, has_content: bool, now: I) -> Option<bool> {
        if !has_content {
            return self.stop_local();
        }

        if let Some(timer) = self.local_timer.take() {
            self.timers.cancel(timer);
        }
        self.local_timer =
            Some(self.timers.schedule_after(TypingTimer::LocalIdle, now, self.idle_timeout));

        if self.local_typing {
            None
        } else {
            self.local_typing = true;
            Some(true)
        }
    }

    /// Stop local typing. Returns `Some(false)` if a stop must be published.
    pub fn stop_local(&mut self) -> Option<bool> {
        if let Some(timer) = self.local_timer.take() {
            self.timers.cancel(timer);
        }

        if self.local_typing {
            self.local_typing = false;
            Some(false)
        } else {
            None
        }
    }

    /// Whether the local user is currently signalled as typing.
    pub fn is_local_typing(&self) -> bool {
        self.local_typing
    }

    /// Fire every due timer.
    pub fn poll_timers(&mut self, now: I) -> TypingExpiry {
        let mut expiry = TypingExpiry::default();
        for (id, timer) in self.timers.fire_due(now) {
            match timer {
                TypingTimer::Remote(username) => {
                    if let Some(index) = self.entries.iter().position(|e| e.timer == id) {
                        self.entries.remove(index);
                        expiry.expired.push(username);
                    }
                },
                TypingTimer::LocalIdle => {
                    if self.local_timer == Some(id) {
                        self.local_timer = None;
                        self.local_typing = false;
                        expiry.local_stopped = true;
                    }
                },
            }
        }
        expiry
    }

    /// Drop all state for the vacated room. Local typing is reset without a
    /// stop signal; the room it applied to is gone.
    pub fn clear(&mut self) {
        self.timers.cancel_all();
        self.entries.clear();
        self.local_typing = false;
        self.local_timer = None;
    }

    /// Earliest pending expiry.
    pub fn next_deadline(&self) -> Option<I> {
        self.timers.next_deadline()
    }

    /// Usernames currently typing, in first-signal order.
    pub fn typing_users(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.username.as_str())
    }

    /// When `username`'s entry expires.
    pub fn expires_at(&self, username: &str) -> Option<I> {
        self.entries.iter().find(|e| e.username == username).map(|e| e.expires_at)
    }

    /// Indicator text, or `None` when nobody is typing.
    pub fn indicator(&self) -> Option<String> {
        match self.entries.as_slice() {
            [] => None,
            [one] => Some(format!("{} is typing…", one.username)),
            [a, b] => Some(format!("{} and {} are typing…", a.username, b.username)),
            many => Some(format!("{} people are typing…", many.len())),
        }
    }
}
