//! Application layer for ChatWave
//!
//! Generic runtime that joins the Sans-IO [`chatwave_client::Session`] to a
//! platform driver, so the same orchestration runs in the command-line client
//! and in deterministic simulation.
//!
//! # Components
//!
//! - [`Driver`]: Trait for platform-specific I/O abstraction
//! - [`Runtime`]: Generic orchestration loop using Driver
//! - [`UserCommand`]: Slash commands typed at the prompt

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod driver;
mod input;
mod runtime;

pub use driver::{Driver, DriverInput};
pub use input::{CommandError, UserCommand};
pub use runtime::Runtime;
