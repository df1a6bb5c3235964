//! Status surface: the JSON report served over HTTP and the
//! [`NetworkState`] pushed to control-socket clients.

use std::sync::PoisonError;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::apps::AppStatusReport;
use crate::daemon::ShutdownSignal;
use crate::dhcp::{ClientState, DhcpClientStatus};
use crate::ipc::{NetworkState, SharedAppHealth, StateCode, StatePair};
use crate::supplicant::{LinkState, SupplicantError, SupplicantHandle, SupplicantStatus};

// ── Network state ───────────────────────────────────────────────────────

/// Map link and lease state onto the wire codes.
///
/// `dhcp` is `None` when the client is not running; its pair then stays
/// `unknown`.
pub fn network_state(link: &LinkState, dhcp: Option<&DhcpClientStatus>) -> NetworkState {
    let supplicant = StatePair::new(
        if link.connected {
            StateCode::Active
        } else {
            StateCode::Inactive
        },
        u32::from(link.last_error.is_some()),
    );
    let dhcp4 = match dhcp {
        None => StatePair::default(),
        Some(status) if status.failed => StatePair::new(StateCode::Err, 1),
        Some(status) if status.state == ClientState::Configured => {
            StatePair::new(StateCode::Active, 0)
        }
        Some(_) => StatePair::new(StateCode::Inactive, 0),
    };
    NetworkState { supplicant, dhcp4 }
}

/// Folds the link and DHCP watches into one `watch<NetworkState>`.
pub struct NetworkStatePublisher {
    link_rx: watch::Receiver<LinkState>,
    dhcp_rx: Option<watch::Receiver<DhcpClientStatus>>,
    network_tx: watch::Sender<NetworkState>,
}

impl NetworkStatePublisher {
    pub fn new(
        link_rx: watch::Receiver<LinkState>,
        dhcp_rx: Option<watch::Receiver<DhcpClientStatus>>,
    ) -> (Self, watch::Receiver<NetworkState>) {
        let initial = network_state(
            &link_rx.borrow(),
            dhcp_rx.as_ref().map(|rx| rx.borrow()).as_deref(),
        );
        let (network_tx, network_rx) = watch::channel(initial);
        let publisher = Self {
            link_rx,
            dhcp_rx,
            network_tx,
        };
        (publisher, network_rx)
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<ShutdownSignal>) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                changed = self.link_rx.changed() => {
                    if changed.is_err() {
                        debug!("link state source closed");
                        break;
                    }
                }
                alive = dhcp_changed(&mut self.dhcp_rx) => {
                    if !alive {
                        debug!("DHCP status source closed");
                        self.dhcp_rx = None;
                    }
                }
            }
            self.publish();
        }
    }

    fn publish(&mut self) {
        let fresh = network_state(
            &self.link_rx.borrow_and_update(),
            self.dhcp_rx.as_mut().map(|rx| rx.borrow_and_update()).as_deref(),
        );
        self.network_tx.send_if_modified(|current| {
            if *current == fresh {
                return false;
            }
            info!(
                supplicant = fresh.supplicant.state,
                dhcp4 = fresh.dhcp4.state,
                "network state changed"
            );
            *current = fresh;
            true
        });
    }
}

/// Resolves when the DHCP status changes (`true`) or its sender is gone
/// (`false`). Never resolves without a receiver.
async fn dhcp_changed(rx: &mut Option<watch::Receiver<DhcpClientStatus>>) -> bool {
    match rx {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

// ── Status report ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DaemonInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
}

impl Default for DaemonInfo {
    fn default() -> Self {
        Self {
            version: crate::build_info::VERSION,
            git_hash: crate::build_info::GIT_HASH,
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub daemon: DaemonInfo,
    pub supplicant: SupplicantStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp4: Option<DhcpClientStatus>,
    pub apps: Vec<AppStatusReport>,
}

/// Everything the status report is assembled from.
#[derive(Clone)]
pub struct StatusSources {
    pub supplicant: SupplicantHandle,
    pub dhcp_rx: Option<watch::Receiver<DhcpClientStatus>>,
    pub apps: SharedAppHealth,
}

impl StatusSources {
    pub async fn report(&self) -> Result<StatusReport, SupplicantError> {
        let supplicant = self.supplicant.status().await?;
        let apps = self
            .apps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dump_status();
        Ok(StatusReport {
            daemon: DaemonInfo::default(),
            supplicant,
            dhcp4: self.dhcp_rx.as_ref().map(|rx| rx.borrow().clone()),
            apps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn link(connected: bool, last_error: Option<&str>) -> LinkState {
        LinkState {
            connected,
            last_error: last_error.map(str::to_string),
        }
    }

    #[test]
    fn test_network_state_mapping() {
        let configured = DhcpClientStatus {
            state: ClientState::Configured,
            ..DhcpClientStatus::default()
        };
        let failed = DhcpClientStatus {
            state: ClientState::Discovering,
            failed: true,
            lease: None,
        };

        let s = network_state(&link(true, None), Some(&configured));
        assert_eq!(s.supplicant, StatePair::new(StateCode::Active, 0));
        assert_eq!(s.dhcp4, StatePair::new(StateCode::Active, 0));

        let s = network_state(&link(false, Some("WRONG_KEY")), Some(&failed));
        assert_eq!(s.supplicant, StatePair::new(StateCode::Inactive, 1));
        assert_eq!(s.dhcp4, StatePair::new(StateCode::Err, 1));

        let s = network_state(&link(false, None), None);
        assert_eq!(s.dhcp4, StatePair::default());
        let s = network_state(&link(false, None), Some(&DhcpClientStatus::default()));
        assert_eq!(s.dhcp4, StatePair::new(StateCode::Inactive, 0));
    }

    #[tokio::test]
    async fn test_publisher_follows_sources() {
        let (link_tx, link_rx) = watch::channel(LinkState::default());
        let (dhcp_tx, dhcp_rx) = watch::channel(DhcpClientStatus::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (publisher, mut network_rx) = NetworkStatePublisher::new(link_rx, Some(dhcp_rx));
        assert!(network_rx.borrow_and_update().supplicant.is(StateCode::Inactive));
        let task = tokio::spawn(publisher.run(shutdown_rx));

        link_tx.send(link(true, None)).unwrap();
        network_rx.changed().await.unwrap();
        assert!(network_rx.borrow_and_update().supplicant.is(StateCode::Active));

        dhcp_tx
            .send(DhcpClientStatus {
                state: ClientState::Configured,
                ..DhcpClientStatus::default()
            })
            .unwrap();
        network_rx.changed().await.unwrap();
        assert!(network_rx.borrow_and_update().dhcp4.is(StateCode::Active));

        shutdown_tx.send(ShutdownSignal).unwrap();
        task.await.unwrap();
    }
}
