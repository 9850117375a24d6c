//! Generic runtime for session orchestration.
//!
//! The Runtime drives the event loop, coordinating between:
//! - [`Session`]: chat session state machine
//! - [`Driver`]: platform-specific I/O
//!
//! Every session action is executed before the next input is read. Actions
//! whose outcome feeds back into the session (opening the transport, a failed
//! send) are resolved in place, so the session always sees transport results
//! in the order they happened.

use std::collections::VecDeque;

use chatwave_client::{Environment, Session, SessionAction, SessionEvent};

use crate::{Driver, DriverInput, UserCommand};

/// Generic runtime that orchestrates a [`Session`] and a [`Driver`].
///
/// # Type Parameters
///
/// - `D`: Platform-specific I/O driver
/// - `E`: Environment the session reads time from
pub struct Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    driver: D,
    session: Session<E>,
}

impl<D, E> Runtime<D, E>
where
    D: Driver<Instant = E::Instant>,
    E: Environment,
{
    /// Create a runtime around a disconnected session.
    pub fn new(driver: D, session: Session<E>) -> Self {
        Self { driver, session }
    }

    /// Session state.
    pub fn session(&self) -> &Session<E> {
        &self.session
    }

    /// The driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Consume the runtime, keeping the session.
    pub fn into_session(self) -> Session<E> {
        self.session
    }

    /// Run until the user quits or input is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to read input or render.
    /// Transport failures are not errors; the session reconnects.
    pub async fn run(mut self) -> Result<(), D::Error> {
        self.start().await?;

        loop {
            let should_quit = self.step().await?;
            if should_quit {
                break;
            }
        }

        self.shutdown().await
    }

    /// Start connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    pub async fn start(&mut self) -> Result<(), D::Error> {
        self.dispatch(SessionEvent::Connect).await
    }

    /// Process one driver input.
    ///
    /// Returns `true` if the runtime should quit.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to read input or render.
    pub async fn step(&mut self) -> Result<bool, D::Error> {
        let deadline = self.session.next_deadline();
        let input = self.driver.next_input(deadline).await?;

        let event = match input {
            DriverInput::Line(line) => match UserCommand::parse(&line) {
                Ok(Some(UserCommand::Quit)) => return Ok(true),
                Ok(Some(command)) => command.into_event(),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("{e}");
                    None
                },
            },
            DriverInput::InputChanged { has_content } => {
                Some(SessionEvent::InputChanged { has_content })
            },
            DriverInput::Frame(frame) => Some(SessionEvent::FrameReceived(frame)),
            DriverInput::TransportClosed { reason } => Some(SessionEvent::TransportClosed { reason }),
            DriverInput::Rooms(rooms) => Some(SessionEvent::RoomsLoaded { rooms }),
            DriverInput::Deadline => Some(SessionEvent::Tick { now: self.driver.now() }),
            DriverInput::Shutdown => return Ok(true),
        };

        if let Some(event) = event {
            self.dispatch(event).await?;
        }
        Ok(false)
    }

    /// Leave the current room, disconnect, and stop the driver.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    pub async fn shutdown(&mut self) -> Result<(), D::Error> {
        self.dispatch(SessionEvent::Disconnect).await?;
        self.driver.stop();
        Ok(())
    }

    /// Feed an event to the session and execute every resulting action.
    async fn dispatch(&mut self, event: SessionEvent<E::Instant>) -> Result<(), D::Error> {
        let mut pending = VecDeque::new();
        self.feed(event, &mut pending);

        // Set once a send fails; later frames were meant for the lost transport
        let mut lost = false;

        while let Some(action) = pending.pop_front() {
            match action {
                SessionAction::Open => {
                    lost = false;
                    let event = match self.driver.open().await {
                        Ok(()) => SessionEvent::TransportOpened,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to open transport");
                            SessionEvent::TransportClosed { reason: e.to_string() }
                        },
                    };
                    self.feed(event, &mut pending);
                },
                SessionAction::Transmit(frame) if lost => {
                    tracing::trace!(command = %frame.command, "transport lost, frame skipped");
                },
                SessionAction::Transmit(frame) => {
                    if let Err(e) = self.driver.send_frame(frame).await {
                        tracing::warn!(error = %e, "send failed");
                        lost = true;
                        self.driver.close();
                        self.feed(SessionEvent::TransportClosed { reason: e.to_string() }, &mut pending);
                    }
                },
                SessionAction::Close => self.driver.close(),
                SessionAction::Render(event) => self.driver.render(&event)?,
            }
        }
        Ok(())
    }

    fn feed(&mut self, event: SessionEvent<E::Instant>, pending: &mut VecDeque<SessionAction>) {
        match self.session.handle(event) {
            Ok(actions) => pending.extend(actions),
            Err(e) => tracing::warn!(error = %e, "session rejected event"),
        }
    }
}
