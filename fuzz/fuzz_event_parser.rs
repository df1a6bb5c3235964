//! Fuzz target for unsolicited event lines and their key=value payloads.
//!
//! Run with: cargo +nightly fuzz run fuzz_event_parser

#![no_main]

use libfuzzer_sys::fuzz_target;
use wlinkd_core::supplicant::parser::{parse_event, parse_key_values};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Some(event) = parse_event(s) {
            let _ = parse_key_values(event.remainder);
        }
        let _ = parse_key_values(s);
    }
});
