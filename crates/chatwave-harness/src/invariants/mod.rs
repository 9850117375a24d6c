//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must always hold during execution. Unlike
//! scenario tests that check specific sequences, they verify behavioral
//! properties across every path a simulation takes.
//!
//! # Architecture
//!
//! Observable state of one session (its own state, the broker's view of its
//! connection, and its render log) is captured into a [`SessionSnapshot`],
//! then every registered [`Invariant`] runs against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = driver.snapshot(runtime.session());
//! registry.check_all(&snapshot)?;
//! ```

mod checks;
mod snapshot;

pub use checks::{
    GlobalSubscriptionsPresent, HistoryBeforeLive, NoDuplicateSubscriptions, NoMessagesOutsideRoom,
    PresenceCountMatchesUsers, RoomSubscriptionsMatchMembership,
};
pub use snapshot::SessionSnapshot;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{invariant}: {message}")]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

/// An invariant that can be checked against session state.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    fn check(&self, state: &SessionSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with the standard session invariants.
    ///
    /// Includes:
    /// - [`RoomSubscriptionsMatchMembership`]: broker room topics follow the
    ///   current room
    /// - [`GlobalSubscriptionsPresent`]: per-identity and global topics stay
    ///   subscribed
    /// - [`NoDuplicateSubscriptions`]: one subscription per destination
    /// - [`HistoryBeforeLive`]: no message precedes its episode's history
    /// - [`NoMessagesOutsideRoom`]: nothing rendered for a vacated room
    /// - [`PresenceCountMatchesUsers`]: presence counts are consistent
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(RoomSubscriptionsMatchMembership);
        registry.add(GlobalSubscriptionsPresent);
        registry.add(NoDuplicateSubscriptions);
        registry.add(HistoryBeforeLive);
        registry.add(NoMessagesOutsideRoom);
        registry.add(PresenceCountMatchesUsers);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &SessionSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking on any violation.
    #[allow(clippy::panic, reason = "test assertion helper")]
    pub fn assert_all(&self, state: &SessionSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(registry.check_all(&SessionSnapshot::empty("alice")).is_ok());
    }
}
