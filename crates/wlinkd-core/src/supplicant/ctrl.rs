//! Control and event channels to the supplicant.
//!
//! Both channels are Unix datagram sockets bound to a private client path
//! and connected to `{socket_dir}/{interface}`. The event channel is the
//! same kind of socket after a successful `ATTACH`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::net::UnixDatagram;
use tracing::{debug, trace};

use super::SupplicantError;
use crate::BoxFuture;

/// Largest reply or event record accepted from the supplicant.
pub const REPLY_BUFFER_LEN: usize = 4096;

/// Request/reply channel. At most one request is outstanding at a time,
/// which `&mut self` enforces.
pub trait ControlChannel: Send {
    /// Send `command` and wait for its reply text.
    fn request<'a>(&'a mut self, command: &'a str) -> BoxFuture<'a, Result<String, SupplicantError>>;
}

/// Stream of unsolicited event records.
pub trait EventChannel: Send {
    /// Wait for the next event record. An error ends event monitoring.
    fn recv(&mut self) -> BoxFuture<'_, Result<String, SupplicantError>>;
}

static CLIENT_SEQ: AtomicU32 = AtomicU32::new(0);

/// A unique client socket path in the system temp directory.
fn client_path() -> PathBuf {
    let seq = CLIENT_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("wlinkd_ctrl_{}_{seq}", std::process::id()))
}

/// A datagram socket bound to a client path that is removed on drop.
struct ClientSocket {
    socket: UnixDatagram,
    local: PathBuf,
}

impl ClientSocket {
    fn connect(remote: &Path) -> Result<Self, SupplicantError> {
        let local = client_path();
        let _ = std::fs::remove_file(&local);
        let socket = UnixDatagram::bind(&local).map_err(|e| {
            SupplicantError::Startup(format!("bind {}: {e}", local.display()))
        })?;
        let sock = ClientSocket { socket, local };
        sock.socket.connect(remote).map_err(|e| {
            SupplicantError::Startup(format!("connect {}: {e}", remote.display()))
        })?;
        Ok(sock)
    }

    async fn recv_text(&self) -> std::io::Result<String> {
        let mut buf = vec![0u8; REPLY_BUFFER_LEN];
        let n = self.socket.recv(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }
}

impl Drop for ClientSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.local);
    }
}

/// Control channel over a Unix datagram socket.
pub struct UnixControlChannel {
    sock: ClientSocket,
    timeout: Duration,
}

impl UnixControlChannel {
    /// Bind a client socket and connect it to the supplicant's control path.
    pub fn connect(remote: &Path, timeout: Duration) -> Result<Self, SupplicantError> {
        let sock = ClientSocket::connect(remote)?;
        debug!(remote = %remote.display(), "control channel open");
        Ok(Self { sock, timeout })
    }

    /// Discard replies that arrived after an earlier request timed out.
    fn drain_stale(&self) {
        let mut buf = vec![0u8; REPLY_BUFFER_LEN];
        loop {
            match self.sock.socket.try_recv(&mut buf) {
                Ok(n) => debug!(
                    reply = %String::from_utf8_lossy(&buf[..n]).trim_end(),
                    "discarding stale control reply"
                ),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "control socket drain stopped");
                    break;
                }
            }
        }
    }

    async fn exchange(&self, command: &str) -> Result<String, SupplicantError> {
        self.drain_stale();
        self.sock
            .socket
            .send(command.as_bytes())
            .await
            .map_err(|e| SupplicantError::command(command, e.to_string()))?;

        let wait = async {
            loop {
                let reply = self.sock.recv_text().await?;
                // Unsolicited events can interleave on an attached socket.
                if reply.starts_with('<') {
                    trace!(record = %reply.trim_end(), "skipping event on control channel");
                    continue;
                }
                return Ok::<_, std::io::Error>(reply);
            }
        };

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(SupplicantError::command(command, e.to_string())),
            Err(_) => Err(SupplicantError::command(
                command,
                format!("no reply within {:?}", self.timeout),
            )),
        }
    }
}

impl ControlChannel for UnixControlChannel {
    fn request<'a>(&'a mut self, command: &'a str) -> BoxFuture<'a, Result<String, SupplicantError>> {
        Box::pin(self.exchange(command))
    }
}

/// Event channel over a Unix datagram socket attached to the supplicant.
pub struct UnixEventChannel {
    sock: ClientSocket,
}

impl UnixEventChannel {
    /// Connect and register for unsolicited events with `ATTACH`.
    pub async fn attach(remote: &Path, timeout: Duration) -> Result<Self, SupplicantError> {
        let sock = ClientSocket::connect(remote)?;
        sock.socket
            .send(b"ATTACH")
            .await
            .map_err(|e| SupplicantError::Startup(format!("ATTACH: {e}")))?;

        let reply = tokio::time::timeout(timeout, sock.recv_text())
            .await
            .map_err(|_| SupplicantError::Startup("no reply to ATTACH".to_string()))?
            .map_err(|e| SupplicantError::Startup(format!("ATTACH: {e}")))?;
        if reply.trim_end() != "OK" {
            return Err(SupplicantError::Startup(format!(
                "ATTACH refused: {:?}",
                reply.trim_end()
            )));
        }

        debug!(remote = %remote.display(), "event channel attached");
        Ok(Self { sock })
    }
}

impl EventChannel for UnixEventChannel {
    fn recv(&mut self) -> BoxFuture<'_, Result<String, SupplicantError>> {
        Box::pin(async move {
            self.sock
                .recv_text()
                .await
                .map_err(|e| SupplicantError::command("EVENT", e.to_string()))
        })
    }
}

impl Drop for UnixEventChannel {
    fn drop(&mut self) {
        let _ = self.sock.socket.try_send(b"DETACH");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// Minimal supplicant stand-in: answers `PING`, `ATTACH`, and pushes
    /// one event to whoever attached.
    fn spawn_fake_supplicant(path: &Path) -> tokio::task::JoinHandle<()> {
        let server = UnixDatagram::bind(path).unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                let Ok((n, peer)) = server.recv_from(&mut buf).await else {
                    return;
                };
                let Some(peer) = peer.as_pathname().map(Path::to_path_buf) else {
                    continue;
                };
                match &buf[..n] {
                    b"PING" => {
                        let _ = server.send_to(b"PONG\n", &peer).await;
                    }
                    b"ATTACH" => {
                        let _ = server.send_to(b"OK\n", &peer).await;
                        let _ = server
                            .send_to(b"<3>CTRL-EVENT-CONNECTED - Connection to x", &peer)
                            .await;
                    }
                    b"SILENT" => {}
                    b"SLOW" => {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        let _ = server.send_to(b"LATE\n", &peer).await;
                    }
                    _ => {
                        let _ = server.send_to(b"UNKNOWN COMMAND\n", &peer).await;
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_control_request_reply() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wlan0");
        let server = spawn_fake_supplicant(&path);

        let mut ctrl = UnixControlChannel::connect(&path, Duration::from_secs(2)).unwrap();
        assert_eq!(ctrl.request("PING").await.unwrap(), "PONG\n");
        assert_eq!(ctrl.request("BOGUS").await.unwrap(), "UNKNOWN COMMAND\n");
        server.abort();
    }

    #[tokio::test]
    async fn test_control_request_times_out() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wlan0");
        let server = spawn_fake_supplicant(&path);

        let mut ctrl = UnixControlChannel::connect(&path, Duration::from_millis(50)).unwrap();
        let err = ctrl.request("SILENT").await.unwrap_err();
        assert!(matches!(err, SupplicantError::Command { ref verb, .. } if verb == "SILENT"));
        server.abort();
    }

    #[tokio::test]
    async fn test_late_reply_not_taken_for_next() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wlan0");
        let server = spawn_fake_supplicant(&path);

        let mut ctrl = UnixControlChannel::connect(&path, Duration::from_millis(30)).unwrap();
        assert!(ctrl.request("SLOW").await.is_err());
        // Let the late reply land before the next request.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ctrl.request("PING").await.unwrap(), "PONG\n");
        server.abort();
    }

    #[tokio::test]
    async fn test_event_channel_attach_and_receive() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wlan0");
        let server = spawn_fake_supplicant(&path);

        let mut events = UnixEventChannel::attach(&path, Duration::from_secs(2))
            .await
            .unwrap();
        let record = events.recv().await.unwrap();
        assert!(record.starts_with("<3>CTRL-EVENT-CONNECTED"));
        server.abort();
    }

    #[tokio::test]
    async fn test_connect_to_missing_socket_is_startup_error() {
        let tmp = TempDir::new().unwrap();
        let err = UnixControlChannel::connect(&tmp.path().join("nope"), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, SupplicantError::Startup(_)));
    }

    #[test]
    fn test_client_paths_are_unique() {
        assert_ne!(client_path(), client_path());
    }
}
