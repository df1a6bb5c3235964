use std::path::{Path, PathBuf};

use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wlinkd_core::ipc::{FrameReader, FrameWriter, Message, NetworkState, StateCode};

use crate::ClientError;
use crate::events::{ClientEvent, DaemonEvent, NetworkStateTracker};

/// Where the daemon listens unless configured otherwise.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/wlinkd.sock";

const EVENT_CAPACITY: usize = 64;

/// One app's connection to the daemon.
pub struct LinkClient {
    path: PathBuf,
    app_index: u32,
    events_tx: broadcast::Sender<ClientEvent>,
    state_tx: watch::Sender<NetworkState>,
    writer: Option<FrameWriter<OwnedWriteHalf>>,
    reader: Option<JoinHandle<()>>,
}

impl LinkClient {
    /// A client for app slot `app_index` of the daemon at `path`. Nothing
    /// is opened until [`connect`](Self::connect).
    pub fn new(path: impl AsRef<Path>, app_index: u32) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(NetworkState::default());
        Self {
            path: path.as_ref().to_path_buf(),
            app_index,
            events_tx,
            state_tx,
            writer: None,
            reader: None,
        }
    }

    /// Receive connection and network events. Only events sent after this
    /// call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }

    /// The last network state pushed by the daemon.
    pub fn network_state(&self) -> watch::Receiver<NetworkState> {
        self.state_tx.subscribe()
    }

    /// Whether a connection is open. A daemon that went away is only
    /// noticed through [`DaemonEvent::Disconnected`].
    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    /// The app slot this client reports for.
    pub fn app_index(&self) -> u32 {
        self.app_index
    }

    /// Connect and start receiving network-state pushes.
    ///
    /// Emits `Connecting`, then `Connected` or `ConnectFailed`.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.writer.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        self.emit(ClientEvent::Daemon(DaemonEvent::Connecting));

        let stream = match UnixStream::connect(&self.path).await {
            Ok(stream) => stream,
            Err(source) => {
                warn!(path = %self.path.display(), error = %source, "failed to connect control socket");
                self.emit(ClientEvent::Daemon(DaemonEvent::ConnectFailed));
                return Err(ClientError::Connect {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };
        let (read_half, write_half) = stream.into_split();
        self.writer = Some(FrameWriter::new(write_half));
        self.reader = Some(tokio::spawn(read_pushes(
            read_half,
            self.events_tx.clone(),
            self.state_tx.clone(),
        )));

        info!(path = %self.path.display(), app_index = self.app_index, "control socket connected");
        self.emit(ClientEvent::Daemon(DaemonEvent::Connected));
        Ok(())
    }

    /// Report this app's own state.
    ///
    /// # Panics
    ///
    /// If called before a successful [`connect`](Self::connect).
    pub async fn send_app_state(&mut self, state: StateCode, error: u32) -> Result<(), ClientError> {
        let index = self.app_index;
        self.connected_writer("send_app_state")
            .write_app_state(index, state.into(), error)
            .await?;
        Ok(())
    }

    /// Report whether this app can reach what it needs to.
    ///
    /// # Panics
    ///
    /// If called before a successful [`connect`](Self::connect).
    pub async fn send_connectivity(&mut self, connected: bool) -> Result<(), ClientError> {
        let index = self.app_index;
        let state = if connected { StateCode::Ok } else { StateCode::Err };
        self.connected_writer("send_connectivity")
            .write_connectivity(index, state.into(), 0)
            .await?;
        Ok(())
    }

    /// Drop the connection. The reader stops without a `Disconnected`
    /// event.
    pub fn disconnect(&mut self) {
        self.writer = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn connected_writer(&mut self, op: &str) -> &mut FrameWriter<OwnedWriteHalf> {
        match self.writer.as_mut() {
            Some(writer) => writer,
            None => panic!("LinkClient::{op} called before connect()"),
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl Drop for LinkClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn read_pushes(
    read_half: OwnedReadHalf,
    events_tx: broadcast::Sender<ClientEvent>,
    state_tx: watch::Sender<NetworkState>,
) {
    let mut reader = FrameReader::new(read_half);
    let mut tracker = NetworkStateTracker::new();
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => match frame.message {
                Some(Message::NetworkState(state)) => {
                    if let Some(event) = tracker.update(state) {
                        let _ = events_tx.send(ClientEvent::Network(event));
                    }
                    state_tx.send_replace(tracker.current());
                }
                Some(Message::AppState(_)) => debug!("ignoring app state from daemon"),
                None => debug!(msg_type = frame.msg_type, "ignoring unknown message"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "control socket read failed");
                break;
            }
        }
    }
    info!("control socket disconnected");
    let _ = events_tx.send(ClientEvent::Daemon(DaemonEvent::Disconnected));
}
