//! Terminal client for ChatWave.
//!
//! Line-based frontend: stdin lines become commands or chat messages, render
//! events become stdout lines. All session logic lives in
//! [`chatwave_client::Session`] and is driven by the shared
//! [`chatwave_app::Runtime`].
//!
//! Input is line-buffered, so the client shows other users typing but never
//! announces its own typing.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod driver;
pub mod error;
pub mod render;
pub mod system_env;

pub use driver::WsDriver;
pub use error::RuntimeError;
pub use render::{LineRenderer, Markup};
pub use system_env::SystemEnv;
