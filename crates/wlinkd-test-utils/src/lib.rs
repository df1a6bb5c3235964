#![deny(unsafe_code)]

//! Shared test utilities for the wlinkd workspace.
//!
//! Config builders, tracing setup, and scripted stand-ins for the things
//! the daemon talks to: the supplicant's control and event sockets, the
//! kernel address configurator, and the DHCP datagram transport.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! wlinkd-test-utils = { workspace = true }
//! ```
//!
//! The fakes implement `wlinkd-core` traits, so inside `wlinkd-core` they
//! are only usable from its `tests/` directory.

pub mod config;
pub mod netlink;
pub mod supplicant;
pub mod tracing_setup;
pub mod transport;
