//! WebSocket driver.
//!
//! Implements [`Driver`] over a tokio-tungstenite WebSocket, line-buffered
//! stdin, and a [`LineRenderer`] on stdout. A single `tokio::select!` waits on
//! stdin, inbound frames, and the session's next deadline.
//!
//! Stdin is read a whole line at a time, so keystrokes are never seen and no
//! [`DriverInput::InputChanged`] is produced: the terminal client does not
//! publish local typing signals. Remote typing indicators are still rendered.

use std::{collections::VecDeque, io::Stdout, time::Instant};

use chatwave_app::{Driver, DriverInput};
use chatwave_client::{
    Environment, RenderEvent, Room,
    transport::{self, ConnectedClient},
};
use chatwave_proto::StompFrame;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::{
    RuntimeError, SystemEnv,
    render::{LineRenderer, Markup},
};

enum Wake {
    Line(Option<String>),
    Frame(Option<StompFrame>),
    Deadline,
}

/// Production driver for the terminal client.
pub struct WsDriver {
    url: String,
    env: SystemEnv,
    client: Option<ConnectedClient>,
    stdin: Lines<BufReader<Stdin>>,
    renderer: LineRenderer<Stdout>,
    queued: VecDeque<DriverInput>,
}

impl WsDriver {
    /// Driver for the broker at `url`. `rooms` is handed to the session as
    /// its directory on the first input.
    pub fn new(url: String, rooms: Vec<Room>, markup: Markup) -> Self {
        Self {
            url,
            env: SystemEnv::new(),
            client: None,
            stdin: BufReader::new(tokio::io::stdin()).lines(),
            renderer: LineRenderer::with_markup(std::io::stdout(), markup),
            queued: VecDeque::from([DriverInput::Rooms(rooms)]),
        }
    }
}

impl Driver for WsDriver {
    type Error = RuntimeError;
    type Instant = Instant;

    async fn next_input(&mut self, deadline: Option<Instant>) -> Result<DriverInput, Self::Error> {
        if let Some(input) = self.queued.pop_front() {
            return Ok(input);
        }

        let sleep = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => std::future::pending().await,
            }
        };

        let wake = tokio::select! {
            line = self.stdin.next_line() => Wake::Line(line?),
            frame = next_frame(&mut self.client) => Wake::Frame(frame),
            () = sleep => Wake::Deadline,
        };

        Ok(match wake {
            Wake::Line(line) => stdin_input(line),
            Wake::Frame(Some(frame)) => DriverInput::Frame(frame),
            Wake::Frame(None) => {
                self.client = None;
                DriverInput::TransportClosed { reason: "connection closed".to_string() }
            },
            Wake::Deadline => DriverInput::Deadline,
        })
    }

    async fn open(&mut self) -> Result<(), Self::Error> {
        let client = transport::connect(&self.url).await?;
        self.client = Some(client);
        Ok(())
    }

    async fn send_frame(&mut self, frame: StompFrame) -> Result<(), Self::Error> {
        let client = self.client.as_ref().ok_or(RuntimeError::NotConnected)?;
        client.to_server.send(frame).await.map_err(|_| RuntimeError::Closed)
    }

    fn close(&mut self) {
        if let Some(client) = self.client.take() {
            client.stop();
        }
    }

    fn now(&self) -> Instant {
        self.env.now()
    }

    fn render(&mut self, event: &RenderEvent) -> Result<(), Self::Error> {
        Ok(self.renderer.render(event)?)
    }

    fn stop(&mut self) {
        self.close();
    }
}

/// Next frame from the open socket. Never resolves with no socket.
async fn next_frame(client: &mut Option<ConnectedClient>) -> Option<StompFrame> {
    match client {
        Some(client) => client.from_server.recv().await,
        None => std::future::pending().await,
    }
}

/// Input for one read from stdin. End of input shuts the session down.
fn stdin_input(line: Option<String>) -> DriverInput {
    line.map_or(DriverInput::Shutdown, DriverInput::Line)
}
