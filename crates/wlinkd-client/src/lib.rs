#![deny(unsafe_code)]

//! Client library for apps talking to wlinkd.
//!
//! An app connects to the daemon's control socket, reports its own health
//! and connectivity, and gets told when the wireless link comes and goes.
//!
//! ```ignore
//! let mut client = LinkClient::new(DEFAULT_SOCKET_PATH, 0);
//! let mut events = client.subscribe();
//! client.connect().await?;
//! client.send_app_state(StateCode::Ok, 0).await?;
//! while let Ok(event) = events.recv().await {
//!     if event == ClientEvent::Network(NetworkEvent::SupplicantConnected) {
//!         // start uploading
//!     }
//! }
//! ```

/// The connection and its push-reader task.
pub mod client;
/// Typed notifications and network-state diffing.
pub mod events;

pub use client::{DEFAULT_SOCKET_PATH, LinkClient};
pub use events::{ClientEvent, DaemonEvent, NetworkEvent, NetworkStateTracker};
pub use wlinkd_core::ipc::{NetworkState, StateCode, StatePair};

/// Errors from the client library.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("already connected")]
    AlreadyConnected,

    #[error("control socket write failed: {0}")]
    Io(#[from] std::io::Error),
}
