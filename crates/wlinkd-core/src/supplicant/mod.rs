//! Wireless supplicant integration.
//!
//! The supplicant is an external process reached over two datagram
//! sockets: a request/reply control channel and an unsolicited event
//! channel. [`SupplicantAdapter`] owns both plus the link state derived
//! from the events, and [`SupplicantService`] drives it from a single task.
//!
//! ```text
//! ┌──────────────┐ commands  ┌───────────────────┐  SCAN, ADD_NETWORK…  ┌──────────────┐
//! │ HTTP / daemon│──────────▶│ SupplicantService │─────────────────────▶│ wpa_supplicant│
//! └──────────────┘           │  (adapter owner)  │◀─────────────────────│              │
//!        ▲                   └─────────┬─────────┘   <2>CTRL-EVENT-…     └──────────────┘
//!        │      watch<LinkState>       │
//!        └─────────────────────────────┘
//! ```

pub mod adapter;
pub mod ctrl;
pub mod parser;
pub mod service;

pub use adapter::{LinkState, SupplicantAdapter, SupplicantStatus};
pub use ctrl::{ControlChannel, EventChannel, UnixControlChannel, UnixEventChannel};
pub use parser::{EventKind, MacAddr, ScanFlags, ScanResult};
pub use service::{SupplicantCommand, SupplicantHandle, SupplicantService};

/// Errors from the supplicant adapter and its channels.
///
/// Command errors carry only the command verb; arguments may hold the
/// network passphrase.
#[derive(Debug, thiserror::Error)]
pub enum SupplicantError {
    #[error("supplicant startup failed: {0}")]
    Startup(String),

    #[error("supplicant command {verb} failed: {reason}")]
    Command { verb: String, reason: String },

    #[error("supplicant rejected configuration at {step}: {reply:?}")]
    ConfigurationRejected { step: String, reply: String },

    #[error("supplicant exited: {0}")]
    Exited(String),

    #[error("supplicant is not started")]
    NotStarted,

    #[error("supplicant service channel closed")]
    ChannelClosed,
}

impl SupplicantError {
    pub(crate) fn command(text: &str, reason: impl Into<String>) -> Self {
        SupplicantError::Command {
            verb: command_verb(text).to_string(),
            reason: reason.into(),
        }
    }
}

/// First word of a control command, safe to log.
pub(crate) fn command_verb(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}
