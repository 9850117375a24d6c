//! Fuzz target for Inbound::decode
//!
//! Feeds the same body to every subscribed topic. Malformed JSON, wrong
//! shapes, and oversized strings must return errors, never panic.

#![no_main]

use chatwave_proto::{Inbound, RoomId, Topic};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let room = RoomId::new("general");
    let topics = [
        Topic::RoomMessages(room.clone()),
        Topic::RoomTyping(room.clone()),
        Topic::RoomPresence(room),
        Topic::OnlineCount,
        Topic::Errors,
        Topic::History,
    ];

    for topic in &topics {
        let _ = Inbound::decode(topic, data);
    }
});
