//! Fuzz target for the scan-result grammar.
//!
//! Run with: cargo +nightly fuzz run fuzz_scan_parser

#![no_main]

use libfuzzer_sys::fuzz_target;
use wlinkd_core::supplicant::parser::{SSID_MAX_LEN, parse_scan_line, parse_scan_results};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let results = parse_scan_results(s);
        let accepted = s.lines().filter_map(parse_scan_line).count();
        assert_eq!(results.len(), accepted);
        assert!(results.iter().all(|r| r.ssid.len() <= SSID_MAX_LEN));
    }
});
