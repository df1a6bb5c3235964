//! Supplicant adapter: process lifecycle, command helpers, and event
//! dispatch.
//!
//! The adapter moves through `NotStarted → Started { connected }`. The
//! `connected` flag and the adapter-wide last error change only inside
//! [`SupplicantAdapter::handle_event`] (or when the event channel dies);
//! every change is published on a `watch` channel.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use wlinkd_config::SupplicantConfig;
use wlinkd_config::network::{NetworkConfig, Psk, Ssid};

use super::ctrl::{ControlChannel, EventChannel, UnixControlChannel, UnixEventChannel};
use super::parser::{self, EventKind, ScanResult};
use super::{SupplicantError, command_verb};

/// Highest network id the adapter accepts from `ADD_NETWORK`.
pub const MAX_NETWORK_ID: u32 = 255;

/// Mode value for an infrastructure (station) network.
pub const MODE_STATION: u8 = 0;

/// How often to look for the control socket while the supplicant starts.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Link state as derived from supplicant events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkState {
    pub connected: bool,
    pub last_error: Option<String>,
}

/// JSON shape of the supplicant section of the status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupplicantStatus {
    pub connected: bool,
    #[serde(rename = "lasterror", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Drives one supplicant instance.
pub struct SupplicantAdapter {
    control: Option<Box<dyn ControlChannel>>,
    events: Option<Box<dyn EventChannel>>,
    child: Option<Child>,
    link: LinkState,
    scan_results: Vec<ScanResult>,
    link_tx: watch::Sender<LinkState>,
}

impl Default for SupplicantAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SupplicantAdapter {
    pub fn new() -> Self {
        let (link_tx, _) = watch::channel(LinkState::default());
        Self {
            control: None,
            events: None,
            child: None,
            link: LinkState::default(),
            scan_results: Vec::new(),
            link_tx,
        }
    }

    /// Build an adapter over already-open channels (no child process).
    pub fn with_channels(control: Box<dyn ControlChannel>, events: Box<dyn EventChannel>) -> Self {
        let mut adapter = Self::new();
        adapter.control = Some(control);
        adapter.events = Some(events);
        adapter
    }

    /// Receive link-state changes.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.link_tx.subscribe()
    }

    /// Whether a control channel is open.
    pub fn is_started(&self) -> bool {
        self.control.is_some()
    }

    pub fn link_state(&self) -> &LinkState {
        &self.link
    }

    /// The last scan-result set. Replaced wholesale on every scan event.
    pub fn scan_results(&self) -> &[ScanResult] {
        &self.scan_results
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the supplicant for `config.interface` and open both channels.
    pub async fn start(&mut self, config: &SupplicantConfig) -> Result<(), SupplicantError> {
        let socket_dir = PathBuf::from(&config.socket_dir);
        let socket_path = socket_dir.join(&config.interface);

        tokio::fs::create_dir_all(&socket_dir)
            .await
            .map_err(|e| SupplicantError::Startup(format!("{}: {e}", socket_dir.display())))?;

        let mut child = Command::new(&config.binary)
            .arg(format!("-D{}", config.driver))
            .arg("-i")
            .arg(&config.interface)
            .arg("-C")
            .arg(&socket_dir)
            .arg("-qq")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupplicantError::Startup(format!("spawn {}: {e}", config.binary)))?;
        info!(
            binary = %config.binary,
            interface = %config.interface,
            pid = ?child.id(),
            "supplicant spawned"
        );

        let deadline = tokio::time::Instant::now() + config.startup_timeout();
        while !socket_path.exists() {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(SupplicantError::Startup(format!(
                    "supplicant exited during startup: {status}"
                )));
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = child.kill().await;
                return Err(SupplicantError::Startup(format!(
                    "control socket {} did not appear within {:?}",
                    socket_path.display(),
                    config.startup_timeout()
                )));
            }
            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }

        let opened = async {
            let control = UnixControlChannel::connect(&socket_path, config.command_timeout())?;
            let events = UnixEventChannel::attach(&socket_path, config.command_timeout()).await?;
            Ok::<_, SupplicantError>((control, events))
        };
        let (control, events) = match opened.await {
            Ok(channels) => channels,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e);
            }
        };

        self.control = Some(Box::new(control));
        self.events = Some(Box::new(events));
        self.child = Some(child);
        info!(socket = %socket_path.display(), "supplicant started");
        Ok(())
    }

    /// Close the event channel, then the control channel, then end the
    /// child process.
    pub async fn stop(&mut self) {
        self.events = None;
        self.control = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to terminate supplicant");
            }
        }
        self.set_connected(false);
        info!("supplicant stopped");
    }

    // ── Commands ────────────────────────────────────────────────────────

    /// Run one control command and return its reply.
    pub async fn send_command(
        &mut self,
        text: &str,
        strip_newline: bool,
    ) -> Result<String, SupplicantError> {
        let control = self.control.as_mut().ok_or(SupplicantError::NotStarted)?;
        trace!(verb = command_verb(text), "supplicant command");
        let mut reply = control.request(text).await?;
        if strip_newline && reply.ends_with('\n') {
            reply.pop();
        }
        Ok(reply)
    }

    /// Ask for a scan. Results arrive later as a scan-results event.
    pub async fn scan(&mut self) -> Result<(), SupplicantError> {
        let reply = self.send_command("SCAN", true).await?;
        if reply != "OK" {
            debug!(reply = %reply, "SCAN not accepted");
        }
        Ok(())
    }

    /// Fetch and parse the bulk scan results, replacing the stored set.
    ///
    /// A failed fetch leaves an empty set.
    pub async fn get_scan_results(&mut self) -> &[ScanResult] {
        self.scan_results = match self.send_command("SCAN_RESULTS", false).await {
            Ok(blob) => parser::parse_scan_results(&blob),
            Err(e) => {
                warn!(error = %e, "failed to fetch scan results");
                Vec::new()
            }
        };
        debug!(count = self.scan_results.len(), "scan results updated");
        &self.scan_results
    }

    async fn expect_ok(&mut self, text: &str, step: &str) -> Result<(), SupplicantError> {
        let reply = self.send_command(text, true).await?;
        if reply != "OK" {
            return Err(SupplicantError::ConfigurationRejected {
                step: step.to_string(),
                reply,
            });
        }
        Ok(())
    }

    /// Create a network block and fill in SSID, passphrase, and mode.
    ///
    /// Stops at the first reply that is not `OK`.
    pub async fn add_network(
        &mut self,
        ssid: &Ssid,
        psk: &Psk,
        mode: u8,
    ) -> Result<u32, SupplicantError> {
        let reply = self.send_command("ADD_NETWORK", true).await?;
        let id = reply
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|id| *id <= MAX_NETWORK_ID)
            .ok_or_else(|| SupplicantError::ConfigurationRejected {
                step: "ADD_NETWORK".to_string(),
                reply: reply.clone(),
            })?;

        self.expect_ok(&format!("SET_NETWORK {id} ssid \"{ssid}\""), "ssid")
            .await?;
        let psk_cmd = Zeroizing::new(format!("SET_NETWORK {id} psk \"{}\"", psk.expose()));
        self.expect_ok(&psk_cmd, "psk").await?;
        self.expect_ok(&format!("SET_NETWORK {id} mode {mode}"), "mode")
            .await?;

        debug!(id, ssid = %ssid, "network added");
        Ok(id)
    }

    /// Make network `id` the one the supplicant associates with.
    pub async fn select_network(&mut self, id: u32) -> Result<(), SupplicantError> {
        self.expect_ok(&format!("SELECT_NETWORK {id}"), "SELECT_NETWORK")
            .await
    }

    /// Add `config` as a station network and switch to it.
    pub async fn configure(&mut self, config: &NetworkConfig) -> Result<u32, SupplicantError> {
        let id = self
            .add_network(&config.ssid, &config.psk, MODE_STATION)
            .await?;
        self.select_network(id).await?;
        info!(id, ssid = %config.ssid, "network selected");
        Ok(id)
    }

    // ── Events ──────────────────────────────────────────────────────────

    /// Wait for the next event record, or for the supplicant process to
    /// exit. Pending forever when neither an event channel nor a child is
    /// held.
    pub async fn next_event(&mut self) -> Result<String, SupplicantError> {
        let Self { events, child, .. } = self;
        let record = async {
            match events.as_mut() {
                Some(events) => events.recv().await,
                None => std::future::pending().await,
            }
        };
        let exited = async {
            match child.as_mut() {
                Some(child) => match child.wait().await {
                    Ok(status) => SupplicantError::Exited(status.to_string()),
                    Err(e) => SupplicantError::Exited(e.to_string()),
                },
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            record = record => record,
            error = exited => Err(error),
        }
    }

    /// Dispatch one unsolicited event record.
    pub async fn handle_event(&mut self, record: &str) {
        let Some(event) = parser::parse_event(record) else {
            debug!(record = %record.trim_end(), "unparsed supplicant event");
            return;
        };
        trace!(priority = event.priority, kind = ?event.kind, "supplicant event");

        match event.kind {
            EventKind::ScanResults => {
                self.get_scan_results().await;
            }
            EventKind::Connected => {
                info!("link connected");
                self.set_connected(true);
            }
            EventKind::Disconnected => {
                info!(details = %event.remainder.trim_end(), "link disconnected");
                self.set_connected(false);
            }
            EventKind::SsidTempDisabled => {
                let fields = parser::parse_key_values(event.remainder);
                if let Some(reason) = fields.get("reason") {
                    warn!(reason = %reason, "network temporarily disabled");
                    self.link.last_error = Some(reason.clone());
                    self.publish();
                }
            }
            EventKind::Other(_) => {}
        }
    }

    /// The event channel failed or the process died: stop monitoring and
    /// report the link down. A dead process also drops the control channel
    /// and becomes the last error.
    pub fn event_channel_failed(&mut self, error: SupplicantError) {
        self.events = None;
        if matches!(error, SupplicantError::Exited(_)) {
            warn!(error = %error, "supplicant process exited");
            self.child = None;
            self.control = None;
            self.link.last_error = Some(error.to_string());
        } else {
            warn!(error = %error, "supplicant event channel failed");
        }
        self.set_connected(false);
    }

    /// Record why [`start`](Self::start) failed. The adapter stays
    /// unstarted and the link stays down.
    pub fn record_startup_failure(&mut self, error: &SupplicantError) {
        self.link.last_error = Some(error.to_string());
        self.set_connected(false);
    }

    /// The supplicant section of the status report.
    pub fn dump_status(&self) -> SupplicantStatus {
        SupplicantStatus {
            connected: self.link.connected,
            last_error: self.link.last_error.clone(),
        }
    }

    fn set_connected(&mut self, connected: bool) {
        self.link.connected = connected;
        self.publish();
    }

    fn publish(&self) {
        self.link_tx.send_replace(self.link.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_commands_before_start_fail() {
        let mut adapter = SupplicantAdapter::new();
        assert!(!adapter.is_started());
        assert!(matches!(
            adapter.send_command("PING", true).await,
            Err(SupplicantError::NotStarted)
        ));
        // Failed fetch still leaves an empty set.
        assert!(adapter.get_scan_results().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_with_missing_binary() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = SupplicantConfig {
            binary: "/nonexistent/wpa_supplicant".to_string(),
            socket_dir: tmp.path().join("sockets").display().to_string(),
            ..SupplicantConfig::default()
        };
        let mut adapter = SupplicantAdapter::new();
        let err = adapter.start(&config).await.unwrap_err();
        assert!(matches!(err, SupplicantError::Startup(_)));
        assert!(!adapter.is_started());
    }

    #[tokio::test]
    async fn test_start_times_out_without_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = SupplicantConfig {
            binary: "sleep".to_string(),
            driver: "x".to_string(),
            socket_dir: tmp.path().display().to_string(),
            startup_timeout_ms: 100,
            ..SupplicantConfig::default()
        };
        // `sleep -Dx ...` exits immediately with a usage error or keeps
        // waiting; either way no socket ever appears.
        let mut adapter = SupplicantAdapter::new();
        let err = adapter.start(&config).await.unwrap_err();
        assert!(matches!(err, SupplicantError::Startup(_)));
    }

    #[tokio::test]
    async fn test_temp_disabled_sets_last_error() {
        let mut adapter = SupplicantAdapter::new();
        let mut rx = adapter.subscribe();
        adapter
            .handle_event(
                r#"<3>CTRL-EVENT-SSID-TEMP-DISABLED id=0 ssid="ghettonet" auth_failures=1 duration=10 reason=WRONG_KEY"#,
            )
            .await;
        assert_eq!(adapter.link_state().last_error.as_deref(), Some("WRONG_KEY"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().last_error.as_deref(),
            Some("WRONG_KEY")
        );
    }

    #[tokio::test]
    async fn test_disconnect_keeps_last_error() {
        let mut adapter = SupplicantAdapter::new();
        adapter.handle_event("<3>CTRL-EVENT-CONNECTED - Connection to x").await;
        adapter
            .handle_event("<3>CTRL-EVENT-SSID-TEMP-DISABLED id=0 reason=CONN_FAILED")
            .await;
        adapter
            .handle_event("<2>CTRL-EVENT-DISCONNECTED bssid=aa:bb:cc:dd:ee:ff reason=3")
            .await;

        let status = adapter.dump_status();
        assert!(!status.connected);
        assert_eq!(status.last_error.as_deref(), Some("CONN_FAILED"));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_events_change_nothing() {
        let mut adapter = SupplicantAdapter::new();
        adapter.handle_event("<3>CTRL-EVENT-BSS-ADDED 0 aa:bb:cc:dd:ee:ff").await;
        adapter.handle_event("garbage").await;
        assert_eq!(adapter.link_state(), &LinkState::default());
    }

    #[test]
    fn test_status_json_omits_missing_error() {
        let status = SupplicantStatus {
            connected: true,
            last_error: None,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({"connected": true})
        );

        let status = SupplicantStatus {
            connected: false,
            last_error: Some("WRONG_KEY".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({"connected": false, "lasterror": "WRONG_KEY"})
        );
    }

    #[tokio::test]
    async fn test_child_exit_marks_link_down() {
        let mut adapter = SupplicantAdapter::new();
        adapter.child = Some(Command::new("true").spawn().unwrap());
        adapter.handle_event("<3>CTRL-EVENT-CONNECTED").await;
        let mut rx = adapter.subscribe();
        let _ = rx.borrow_and_update();

        let err = tokio::time::timeout(Duration::from_secs(5), adapter.next_event())
            .await
            .expect("child exit not noticed")
            .unwrap_err();
        assert!(matches!(err, SupplicantError::Exited(_)));
        adapter.event_channel_failed(err);

        let link = rx.borrow_and_update().clone();
        assert!(!link.connected);
        assert!(link.last_error.unwrap().contains("exited"));
        assert!(!adapter.is_started());
    }

    #[tokio::test]
    async fn test_startup_failure_is_recorded() {
        let mut adapter = SupplicantAdapter::new();
        adapter.record_startup_failure(&SupplicantError::Startup("no binary".to_string()));
        let status = adapter.dump_status();
        assert!(!status.connected);
        assert_eq!(
            status.last_error.as_deref(),
            Some("supplicant startup failed: no binary")
        );
    }

    #[tokio::test]
    async fn test_event_channel_failure_marks_disconnected() {
        let mut adapter = SupplicantAdapter::new();
        adapter.handle_event("<3>CTRL-EVENT-CONNECTED").await;
        assert!(adapter.link_state().connected);
        adapter.event_channel_failed(SupplicantError::ChannelClosed);
        assert!(!adapter.link_state().connected);
    }
}
