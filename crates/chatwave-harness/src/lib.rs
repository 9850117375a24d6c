//! Deterministic simulation harness for ChatWave sessions.
//!
//! An in-memory broker and a virtual clock stand in for the network and the
//! wall clock, so the production runtime can be driven through reconnects,
//! typing timeouts, and room switches with exact, repeatable timing.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral checks that must hold after
//! every input. [`Scenario`] runs [`InvariantRegistry::standard()`]
//! automatically.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod invariants;
pub mod scenario;
pub mod sim_broker;
pub mod sim_driver;
pub mod sim_env;

pub use invariants::{
    GlobalSubscriptionsPresent, HistoryBeforeLive, Invariant, InvariantRegistry, InvariantResult,
    NoDuplicateSubscriptions, NoMessagesOutsideRoom, PresenceCountMatchesUsers,
    RoomSubscriptionsMatchMembership, SessionSnapshot, Violation,
};
pub use scenario::Scenario;
pub use sim_broker::{ConnId, HISTORY_LIMIT, SYSTEM_SENDER, SimBroker};
pub use sim_driver::{
    DEFAULT_MAX_STEPS, SharedBroker, SimDriver, SimDriverError, Step, shared_broker,
};
pub use sim_env::{SimEnv, SimInstant};
