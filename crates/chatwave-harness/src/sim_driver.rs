//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` gives the runtime the same interface as the WebSocket driver,
//! backed by a [`SimBroker`] and a [`SimEnv`] clock. Inputs come from a
//! script; frames make a full encode and decode trip in each direction so the
//! codec is exercised exactly as on a real socket.
//!
//! Input priority on every call:
//! 1. A connection the broker dropped is reported as lost
//! 2. Frames queued by the broker, in order
//! 3. A session deadline that has already passed
//! 4. The next script step
//!
//! With the script exhausted the driver reports [`DriverInput::Shutdown`].

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chatwave_app::{Driver, DriverInput};
use chatwave_client::{Environment, RenderEvent, Session};
use chatwave_proto::{ProtocolError, StompFrame};
use thiserror::Error;

use crate::{
    invariants::{InvariantRegistry, SessionSnapshot},
    sim_broker::{ConnId, SimBroker},
    sim_env::{SimEnv, SimInstant},
};

/// Inputs after which the driver gives up, so a retry loop cannot spin
/// forever.
pub const DEFAULT_MAX_STEPS: usize = 10_000;

/// Broker shared between drivers and the test.
pub type SharedBroker = Arc<Mutex<SimBroker>>;

/// Wrap a broker for sharing.
pub fn shared_broker(broker: SimBroker) -> SharedBroker {
    Arc::new(Mutex::new(broker))
}

/// Error type for simulation driver.
#[derive(Debug, Error)]
pub enum SimDriverError {
    /// The broker refused the connection.
    #[error("connection refused")]
    Refused,

    /// No open connection.
    #[error("transport not open")]
    NotOpen,

    /// A frame did not survive the wire.
    #[error("wire codec: {0}")]
    Codec(#[from] ProtocolError),
}

/// One scripted step.
#[derive(Debug, Clone)]
pub enum Step {
    /// Hand an input to the runtime.
    Input(DriverInput),
    /// Let virtual time pass, firing any deadline on the way.
    Advance(Duration),
}

struct DriverState {
    conn: Option<ConnId>,
    script: VecDeque<Step>,
    rendered: Vec<RenderEvent>,
    /// Start of the events not yet returned by `take_rendered`
    cursor: usize,
    steps: usize,
    max_steps: usize,
}

/// Simulation driver for deterministic testing.
///
/// Clones share state, so a test can keep a handle while the runtime owns
/// another.
#[derive(Clone)]
pub struct SimDriver {
    env: SimEnv,
    broker: SharedBroker,
    state: Arc<Mutex<DriverState>>,
    invariants: Option<Arc<InvariantRegistry>>,
}

impl SimDriver {
    /// Driver on `env` talking to `broker`.
    pub fn new(env: SimEnv, broker: SharedBroker) -> Self {
        let state = DriverState {
            conn: None,
            script: VecDeque::new(),
            rendered: Vec::new(),
            cursor: 0,
            steps: 0,
            max_steps: DEFAULT_MAX_STEPS,
        };
        Self { env, broker, state: Arc::new(Mutex::new(state)), invariants: None }
    }

    /// Enable invariant checking.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(Arc::new(registry));
        self
    }

    /// Change the step limit.
    #[must_use]
    pub fn with_max_steps(self, max_steps: usize) -> Self {
        self.state().max_steps = max_steps;
        self
    }

    /// The virtual clock.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Lock the broker.
    pub fn broker(&self) -> MutexGuard<'_, SimBroker> {
        self.broker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared broker handle.
    pub fn shared_broker(&self) -> SharedBroker {
        Arc::clone(&self.broker)
    }

    /// Current broker connection.
    pub fn connection(&self) -> Option<ConnId> {
        self.state().conn
    }

    /// Append a step to the script.
    pub fn push(&self, step: Step) {
        self.state().script.push_back(step);
    }

    /// Whether scripted steps remain.
    pub fn has_pending(&self) -> bool {
        !self.state().script.is_empty()
    }

    /// Every render event so far.
    pub fn rendered(&self) -> Vec<RenderEvent> {
        self.state().rendered.clone()
    }

    /// Render events since the previous call.
    pub fn take_rendered(&self) -> Vec<RenderEvent> {
        let mut state = self.state();
        let fresh = state.rendered[state.cursor..].to_vec();
        state.cursor = state.rendered.len();
        fresh
    }

    /// Inputs handed out so far.
    pub fn steps(&self) -> usize {
        self.state().steps
    }

    /// Capture the session together with the broker's view of it.
    pub fn snapshot<E: Environment>(&self, session: &Session<E>) -> SessionSnapshot {
        let (conn, rendered) = {
            let state = self.state();
            (state.conn, state.rendered.clone())
        };
        let subscriptions = conn.and_then(|conn| {
            let broker = self.broker();
            broker.is_open(conn).then(|| broker.subscriptions(conn))
        });
        SessionSnapshot::capture(session, subscriptions, rendered)
    }

    /// Check invariants against the session, if enabled.
    pub fn check_invariants<E: Environment>(&self, session: &Session<E>, context: &str) {
        if let Some(registry) = &self.invariants {
            registry.assert_all(&self.snapshot(session), context);
        }
    }

    fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll(&self, deadline: Option<SimInstant>) -> Result<DriverInput, SimDriverError> {
        let mut state = self.state();
        loop {
            state.steps += 1;
            if state.steps > state.max_steps {
                tracing::warn!(steps = state.max_steps, "step limit reached");
                return Ok(DriverInput::Shutdown);
            }

            if let Some(conn) = state.conn {
                let mut broker = self.broker();
                if !broker.is_open(conn) {
                    state.conn = None;
                    return Ok(DriverInput::TransportClosed {
                        reason: "connection dropped by broker".to_string(),
                    });
                }
                if let Some(frame) = broker.pop_frame(conn) {
                    match over_the_wire(&frame)? {
                        Some(frame) => return Ok(DriverInput::Frame(frame)),
                        None => continue,
                    }
                }
            }

            let now = self.env.now();
            if deadline.is_some_and(|d| d <= now) {
                return Ok(DriverInput::Deadline);
            }

            return Ok(match state.script.pop_front() {
                Some(Step::Input(input)) => input,
                Some(Step::Advance(by)) => {
                    let target = now + by;
                    match deadline {
                        Some(d) if d < target => {
                            // Fire the deadline, then resume the rest of the wait
                            self.env.advance_to(d);
                            state.script.push_front(Step::Advance(target - d));
                        },
                        _ => {
                            self.env.advance_to(target);
                        },
                    }
                    DriverInput::Deadline
                },
                None => DriverInput::Shutdown,
            });
        }
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;
    type Instant = SimInstant;

    async fn next_input(
        &mut self,
        deadline: Option<SimInstant>,
    ) -> Result<DriverInput, Self::Error> {
        self.poll(deadline)
    }

    async fn open(&mut self) -> Result<(), Self::Error> {
        let conn = self.broker().open().ok_or(SimDriverError::Refused)?;
        self.state().conn = Some(conn);
        Ok(())
    }

    async fn send_frame(&mut self, frame: StompFrame) -> Result<(), Self::Error> {
        let conn = self.state().conn.ok_or(SimDriverError::NotOpen)?;
        let Some(frame) = over_the_wire(&frame)? else {
            return Ok(());
        };

        let mut broker = self.broker();
        if !broker.is_open(conn) {
            return Err(SimDriverError::NotOpen);
        }
        broker.receive(conn, frame);
        Ok(())
    }

    fn close(&mut self) {
        let conn = self.state().conn.take();
        if let Some(conn) = conn {
            self.broker().drop_connection(conn);
        }
    }

    fn now(&self) -> SimInstant {
        self.env.now()
    }

    fn render(&mut self, event: &RenderEvent) -> Result<(), Self::Error> {
        self.state().rendered.push(event.clone());
        Ok(())
    }

    fn stop(&mut self) {
        self.close();
    }
}

/// Encode and decode a frame, as a socket would.
fn over_the_wire(frame: &StompFrame) -> Result<Option<StompFrame>, SimDriverError> {
    Ok(StompFrame::decode(&frame.encode())?)
}
