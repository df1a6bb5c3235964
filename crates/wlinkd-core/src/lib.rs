#![deny(unsafe_code)]

//! wlinkd core: wireless link control.
//!
//! Drives a `wpa_supplicant` instance over its control sockets, acquires or
//! hands out IPv4 addresses over DHCP, and reports app and network health
//! to local processes over a small binary control-socket protocol.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, the return type of async
/// trait methods that are used through `dyn Trait`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-app health slots fed from the control socket.
pub mod apps;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Daemon runtime and shutdown signalling.
pub mod daemon;
/// DHCPv4 client and server.
pub mod dhcp;
/// HTTP/JSON status and configuration façade.
pub mod http;
/// Binary control-socket protocol and its daemon-side server.
pub mod ipc;
/// Kernel interface lookup and address configuration.
pub mod netlink;
/// Status report and network-state publishing.
pub mod status;
/// `wpa_supplicant` control: parser, channels, adapter, service.
pub mod supplicant;

pub use apps::AppHealth;
pub use daemon::{Daemon, DaemonError, ShutdownSignal};
pub use ipc::{IpcServer, NetworkState};
pub use supplicant::{SupplicantAdapter, SupplicantHandle, SupplicantService};
