//! Fuzz target for the control-socket frame reader.
//!
//! Run with: cargo +nightly fuzz run fuzz_ipc_frames

#![no_main]

use libfuzzer_sys::fuzz_target;
use wlinkd_core::ipc::FrameReader;

fuzz_target!(|data: &[u8]| {
    let Ok(rt) = tokio::runtime::Builder::new_current_thread().build() else {
        return;
    };
    rt.block_on(async {
        let mut reader = FrameReader::new(data);
        // Each frame consumes at least its two header bytes.
        for _ in 0..=data.len() / 2 {
            match reader.read_frame().await {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
    });
});
