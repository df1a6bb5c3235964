//! Fuzz target for the TOML daemon config and the JSON network store format.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = wlinkd_config::AppConfig::parse(s);
        let _ = wlinkd_config::network::parse_stored(s);
    }
});
