//! ChatWave terminal client entry point.
//!
//! # Usage
//!
//! ```bash
//! chatwave --username alice
//! chatwave --username bob --room tech --room random --url ws://chat.local:8080/ws/websocket
//! ```

use std::time::Duration;

use chatwave_app::Runtime;
use chatwave_cli::{Markup, SystemEnv, WsDriver};
use chatwave_client::{Identity, Room, RoomId, Session, SessionConfig};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// ChatWave terminal client
#[derive(Parser, Debug)]
#[command(name = "chatwave")]
#[command(about = "Terminal client for the ChatWave chat broker")]
#[command(version)]
struct Args {
    /// Broker WebSocket URL
    #[arg(long, default_value = "ws://localhost:8080/ws/websocket")]
    url: String,

    /// Username, at least two characters
    #[arg(short, long)]
    username: String,

    /// Room directory, in order. The first room is joined on connect.
    #[arg(short, long = "room", default_values_t = [String::from("general")])]
    rooms: Vec<String>,

    /// Delay between reconnect attempts, in milliseconds
    #[arg(long, default_value = "3000")]
    reconnect_ms: u64,

    /// HTML-escape output lines for embedding in a web page
    #[arg(long)]
    html: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    let identity = Identity::new(&args.username)?;
    let mut config = SessionConfig::default();
    config.connection.reconnect_delay = Duration::from_millis(args.reconnect_ms);

    let rooms = args
        .rooms
        .iter()
        .map(|id| Room {
            id: RoomId::new(id.as_str()),
            name: format!("# {id}"),
            description: String::new(),
            online_count: 0,
        })
        .collect();

    tracing::info!(url = %args.url, username = %identity, "starting");

    let session = Session::new(SystemEnv::new(), identity, config);
    let markup = if args.html { Markup::Html } else { Markup::Plain };
    let driver = WsDriver::new(args.url, rooms, markup);
    Runtime::new(driver, session).run().await?;

    Ok(())
}
