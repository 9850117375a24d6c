//! Driver trait for abstracting I/O operations.
//!
//! The [`Driver`] trait decouples the runtime loop from specific I/O. The
//! command-line client implements it over a WebSocket and stdin, the
//! simulation harness over an in-memory broker and a virtual clock, while the
//! generic [`crate::Runtime`] does all orchestration.

use std::future::Future;

use chatwave_client::{RenderEvent, Room};
use chatwave_core::Moment;
use chatwave_proto::StompFrame;

/// Input the driver hands to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverInput {
    /// User submitted a line.
    Line(String),
    /// Composer content changed.
    InputChanged {
        /// Whether the composer is non-empty.
        has_content: bool,
    },
    /// Frame received from the broker.
    Frame(StompFrame),
    /// The open transport was lost.
    TransportClosed {
        /// Description of the loss.
        reason: String,
    },
    /// Room directory fetched.
    Rooms(Vec<Room>),
    /// The deadline passed to [`Driver::next_input`] was reached.
    Deadline,
    /// Input is exhausted; the runtime should shut down.
    Shutdown,
}

/// Abstracts I/O operations for the runtime.
///
/// # Implementations
///
/// - **CLI**: tokio-tungstenite WebSocket, line-based stdin, stdout renderer
/// - **Simulation**: in-memory broker with a virtual clock
pub trait Driver: Send {
    /// Platform-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Time instant type. Enables virtual time in simulation.
    type Instant: Moment;

    /// Wait for the next input.
    ///
    /// Resolves with [`DriverInput::Deadline`] once `deadline` passes with
    /// nothing else ready. With no deadline the driver waits indefinitely.
    fn next_input(
        &mut self,
        deadline: Option<Self::Instant>,
    ) -> impl Future<Output = Result<DriverInput, Self::Error>> + Send;

    /// Open a transport to the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be opened. The runtime treats
    /// this as a transport failure and lets the session schedule a retry.
    fn open(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send a frame to the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed or the send fails.
    fn send_frame(
        &mut self,
        frame: StompFrame,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Close the transport, if open.
    fn close(&mut self);

    /// Current time instant.
    fn now(&self) -> Self::Instant;

    /// Present a render event.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails. Rendering errors are fatal.
    fn render(&mut self, event: &RenderEvent) -> Result<(), Self::Error>;

    /// Stop the driver and clean up resources.
    fn stop(&mut self);
}
