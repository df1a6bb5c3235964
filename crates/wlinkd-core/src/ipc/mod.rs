//! Control-socket protocol between the daemon and local apps.
//!
//! A small binary framing over a Unix stream socket. Apps push their health
//! ([`AppStateUpdate`]); the daemon pushes [`NetworkState`] on connect and
//! on every change.
//!
//! ```text
//! ┌──────────┐   app state / connectivity   ┌──────────────┐
//! │   App    │─────────────────────────────▶│  IpcServer   │──▶ AppHealth
//! │ (client) │◀─────────────────────────────│              │
//! └──────────┘        network state         └──────────────┘
//! ```

pub mod server;
pub mod types;
pub mod wire;

pub use server::{IpcServer, SharedAppHealth};
pub use types::*;
pub use wire::{Frame, FrameReader, FrameWriter, encode_frame};
