//! Daemon side of the control socket.
//!
//! Binds the well-known Unix socket, accepts app connections, routes their
//! app-state updates into [`AppHealth`] and pushes the current
//! [`NetworkState`] to each connection on connect and on every change.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::types::{Message, NetworkState};
use super::wire::{FrameReader, FrameWriter};
use crate::apps::AppHealth;
use crate::daemon::ShutdownSignal;

/// App health shared between connection tasks and the status surface.
pub type SharedAppHealth = Arc<Mutex<AppHealth>>;

pub struct IpcServer {
    path: PathBuf,
    listener: UnixListener,
    apps: SharedAppHealth,
    network_rx: watch::Receiver<NetworkState>,
}

impl IpcServer {
    /// Bind `path`, replacing a stale socket file left by a previous run.
    pub fn bind(
        path: impl Into<PathBuf>,
        apps: SharedAppHealth,
        network_rx: watch::Receiver<NetworkState>,
    ) -> std::io::Result<Self> {
        let path = path.into();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "control socket listening");
        Ok(Self {
            path,
            listener,
            apps,
            network_rx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until shutdown, then drop them all and remove the
    /// socket file.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<ShutdownSignal>) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        debug!(connections = connections.len() + 1, "app connected");
                        connections.spawn(serve_connection(
                            stream,
                            self.apps.clone(),
                            self.network_rx.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept failed on control socket"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.shutdown().await;
        drop(self.listener);
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(error = %e, "control socket already gone");
        }
        info!("control socket closed");
    }
}

async fn serve_connection(
    stream: UnixStream,
    apps: SharedAppHealth,
    mut network_rx: watch::Receiver<NetworkState>,
) {
    let (read_half, write_half) = stream.into_split();

    let inbound = async move {
        let mut reader = FrameReader::new(read_half);
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => match frame.message {
                    Some(Message::AppState(update)) => {
                        apps.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .on_app_state_update(&update);
                    }
                    Some(Message::NetworkState(_)) => {
                        debug!("ignoring network state sent by an app");
                    }
                    None => {}
                },
                Ok(None) => {
                    debug!("app disconnected");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "dropping app connection");
                    break;
                }
            }
        }
    };

    let outbound = async move {
        let mut writer = FrameWriter::new(write_half);
        loop {
            let state = *network_rx.borrow_and_update();
            if let Err(e) = writer.write_network_state(&state).await {
                debug!(error = %e, "network state push failed");
                return;
            }
            if network_rx.changed().await.is_err() {
                // No more updates; keep serving inbound frames.
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = inbound => {}
        _ = outbound => {}
    }
}
