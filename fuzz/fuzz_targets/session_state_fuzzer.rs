//! Fuzz target for the session state machine
//!
//! Drives one session with arbitrary user actions, transport events, raw
//! inbound frames, and clock jumps. `handle` must never panic, whatever the
//! event order, and a session that has left every room must report no
//! current room.

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use chatwave_client::{Identity, RoomId, Session, SessionConfig, SessionEvent};
use chatwave_harness::SimEnv;
use chatwave_proto::StompFrame;
use libfuzzer_sys::fuzz_target;

const ROOMS: [&str; 3] = ["general", "tech", "random"];

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Connect,
    Opened,
    Closed,
    Frame(Vec<u8>),
    Join(u8),
    Leave,
    Typing(bool),
    Say(String),
    Advance(u16),
    Disconnect,
}

fuzz_target!(|ops: Vec<Op>| {
    let env = SimEnv::new();
    let identity = Identity::new("alice").expect("valid username");
    let mut session = Session::new(env.clone(), identity, SessionConfig::default());

    for op in ops.into_iter().take(256) {
        let left = matches!(op, Op::Leave | Op::Disconnect);
        let event = match op {
            Op::Connect => SessionEvent::Connect,
            Op::Opened => SessionEvent::TransportOpened,
            Op::Closed => SessionEvent::TransportClosed { reason: "fuzz".into() },
            Op::Frame(bytes) => match StompFrame::decode(&bytes) {
                Ok(Some(frame)) => SessionEvent::FrameReceived(frame),
                _ => continue,
            },
            Op::Join(i) => SessionEvent::Join { room: RoomId::new(ROOMS[i as usize % ROOMS.len()]) },
            Op::Leave => SessionEvent::Leave,
            Op::Typing(has_content) => SessionEvent::InputChanged { has_content },
            Op::Say(content) => SessionEvent::SendMessage { content },
            Op::Advance(ms) => SessionEvent::Tick { now: env.advance(Duration::from_millis(ms.into())) },
            Op::Disconnect => SessionEvent::Disconnect,
        };

        let _ = session.handle(event);

        if left {
            assert!(session.current_room().is_none(), "room still current after leaving");
        }
    }
});
