//! Fuzz target for StompFrame::decode
//!
//! Tests frame decoding with arbitrary byte sequences to find:
//! - Parser panics on truncated or unterminated frames
//! - Bad `content-length` arithmetic
//! - Header escape sequences that slip past validation
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use chatwave_proto::StompFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(Some(frame)) = StompFrame::decode(data) {
        let _ = frame.body_str();
        let _ = frame.encode();
    }
});
