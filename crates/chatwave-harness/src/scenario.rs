//! Scripted end-to-end scenarios.
//!
//! A [`Scenario`] wires a [`Session`] into the production
//! [`chatwave_app::Runtime`] over a [`SimDriver`], and checks the standard
//! invariants after every input the runtime processes.
//!
//! ```ignore
//! let mut sim = Scenario::new(Identity::new("alice")?);
//! sim.rooms().line("/join general").advance(Duration::from_secs(1));
//! sim.run().await?;
//! ```

use std::{sync::MutexGuard, time::Duration};

use chatwave_app::{DriverInput, Runtime};
use chatwave_client::{Identity, RenderEvent, Session, SessionConfig};

use crate::{
    invariants::InvariantRegistry,
    sim_broker::SimBroker,
    sim_driver::{SharedBroker, SimDriver, SimDriverError, Step, shared_broker},
    sim_env::SimEnv,
};

/// One simulated client against a shared broker.
pub struct Scenario {
    driver: SimDriver,
    runtime: Runtime<SimDriver, SimEnv>,
    started: bool,
}

impl Scenario {
    /// Client with default configuration against a broker with the seeded
    /// rooms.
    pub fn new(identity: Identity) -> Self {
        Self::with_broker(
            shared_broker(SimBroker::with_default_rooms()),
            identity,
            SessionConfig::default(),
        )
    }

    /// Client against an existing broker, which may be shared with other
    /// scenarios.
    pub fn with_broker(broker: SharedBroker, identity: Identity, config: SessionConfig) -> Self {
        let env = SimEnv::new();
        let driver =
            SimDriver::new(env.clone(), broker).with_invariants(InvariantRegistry::standard());
        let session = Session::new(env, identity, config);
        let runtime = Runtime::new(driver.clone(), session);
        Self { driver, runtime, started: false }
    }

    /// The driver handle.
    pub fn driver(&self) -> &SimDriver {
        &self.driver
    }

    /// Session state.
    pub fn session(&self) -> &Session<SimEnv> {
        self.runtime.session()
    }

    /// Lock the broker.
    pub fn broker(&self) -> MutexGuard<'_, SimBroker> {
        self.driver.broker()
    }

    /// Script a submitted line.
    pub fn line(&mut self, text: &str) -> &mut Self {
        self.input(DriverInput::Line(text.to_string()))
    }

    /// Script any driver input.
    pub fn input(&mut self, input: DriverInput) -> &mut Self {
        self.driver.push(Step::Input(input));
        self
    }

    /// Script a pause.
    pub fn advance(&mut self, by: Duration) -> &mut Self {
        self.driver.push(Step::Advance(by));
        self
    }

    /// Script the directory fetch, using the broker's current room list.
    pub fn rooms(&mut self) -> &mut Self {
        let rooms = self.broker().rooms();
        self.input(DriverInput::Rooms(rooms))
    }

    /// Render events since the previous call.
    pub fn take_rendered(&self) -> Vec<RenderEvent> {
        self.driver.take_rendered()
    }

    /// Connect on first use, then process input until the script and the
    /// broker are both drained, or the user quits.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails.
    pub async fn run(&mut self) -> Result<(), SimDriverError> {
        if !self.started {
            self.started = true;
            self.runtime.start().await?;
            self.check("after connect");
        }

        loop {
            let quit = self.runtime.step().await?;
            self.check(&format!("at step {}", self.driver.steps()));
            if quit {
                return Ok(());
            }
        }
    }

    /// Leave, disconnect, and stop the driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails.
    pub async fn finish(mut self) -> Result<Session<SimEnv>, SimDriverError> {
        self.runtime.shutdown().await?;
        self.check("after shutdown");
        Ok(self.runtime.into_session())
    }

    fn check(&self, context: &str) {
        self.driver.check_invariants(self.runtime.session(), context);
    }
}
