//! Tasks running the DHCP state machines against real sockets.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::client::{Action, DhcpClient, DhcpClientStatus};
use super::server::DhcpServer;
use super::{DhcpError, DhcpTransport};
use crate::daemon::ShutdownSignal;
use crate::netlink::{AddressConfigurator, LinkInfo};
use crate::supplicant::LinkState;

/// Runs the DHCP client, following the supplicant's link state: a link
/// coming up starts negotiation, a link going down stops it.
pub struct DhcpClientService {
    client: DhcpClient,
    transport: Box<dyn DhcpTransport>,
    configurator: Arc<dyn AddressConfigurator>,
    ifname: String,
    link: LinkInfo,
    link_rx: watch::Receiver<LinkState>,
    status_tx: watch::Sender<DhcpClientStatus>,
}

impl DhcpClientService {
    pub fn new(
        client: DhcpClient,
        transport: Box<dyn DhcpTransport>,
        configurator: Arc<dyn AddressConfigurator>,
        ifname: impl Into<String>,
        link: LinkInfo,
        link_rx: watch::Receiver<LinkState>,
    ) -> (Self, watch::Receiver<DhcpClientStatus>) {
        let (status_tx, status_rx) = watch::channel(client.dump_status());
        let service = Self {
            client,
            transport,
            configurator,
            ifname: ifname.into(),
            link,
            link_rx,
            status_tx,
        };
        (service, status_rx)
    }

    /// Run until shutdown or until the link-state source goes away.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<ShutdownSignal>) {
        info!(ifname = %self.ifname, "DHCP client service started");

        let mut connected = self.link_rx.borrow_and_update().connected;
        if connected {
            self.on_link_up().await;
        }

        loop {
            let deadline = self.client.deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending().await,
                }
            };

            let actions = tokio::select! {
                _ = shutdown_rx.recv() => break,
                changed = self.link_rx.changed() => {
                    if changed.is_err() {
                        debug!("link state source closed");
                        break;
                    }
                    let now_connected = self.link_rx.borrow_and_update().connected;
                    if now_connected == connected {
                        continue;
                    }
                    connected = now_connected;
                    if connected {
                        self.on_link_up().await;
                        continue;
                    }
                    info!(ifname = %self.ifname, "link down, releasing address");
                    self.client.stop()
                }
                received = self.transport.recv() => match received {
                    Ok(pkt) => self.client.handle_packet(&pkt, std::time::Instant::now()),
                    Err(DhcpError::Packet(e)) => {
                        debug!(error = %e, "ignoring malformed DHCP packet");
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "DHCP transport failed");
                        break;
                    }
                },
                _ = timer => self.client.handle_timeout(std::time::Instant::now()),
            };
            self.apply(actions).await;
        }

        let actions = self.client.stop();
        self.apply(actions).await;
        info!("DHCP client service stopped");
    }

    async fn on_link_up(&mut self) {
        info!(ifname = %self.ifname, "link up, acquiring address");
        let actions = self.client.start(
            self.link.index,
            &self.ifname,
            self.link.mac,
            std::time::Instant::now(),
        );
        self.apply(actions).await;
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            if let Err(e) = self.perform(action).await {
                error!(error = %e, "DHCP action failed");
                self.client.report_failure();
            }
        }
        self.status_tx.send_if_modified(|status| {
            let fresh = self.client.dump_status();
            if *status == fresh {
                return false;
            }
            *status = fresh;
            true
        });
    }

    async fn perform(&self, action: Action) -> Result<(), DhcpError> {
        match action {
            Action::Send(pkt) => self.transport.send(&pkt).await,
            Action::Configure {
                ifindex,
                addr,
                prefix_len,
                gateway,
            } => {
                self.configurator
                    .set_address(ifindex, addr, prefix_len)
                    .await?;
                match gateway {
                    Some(gw) => self.configurator.set_default_route(ifindex, gw).await?,
                    None => warn!("lease has no router, default route left alone"),
                }
                Ok(())
            }
            Action::ClearAddress { ifindex } => {
                self.configurator.clear_address(ifindex).await?;
                Ok(())
            }
        }
    }
}

/// Runs the DHCP server on its transport until shutdown.
pub struct DhcpServerService {
    server: DhcpServer,
    transport: Box<dyn DhcpTransport>,
}

impl DhcpServerService {
    pub fn new(server: DhcpServer, transport: Box<dyn DhcpTransport>) -> Self {
        Self { server, transport }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<ShutdownSignal>) {
        info!(
            server_id = %self.server.pool().server_id,
            pool_start = %self.server.pool().start,
            pool_len = self.server.pool().len,
            "DHCP server started"
        );

        loop {
            let received = tokio::select! {
                _ = shutdown_rx.recv() => break,
                received = self.transport.recv() => received,
            };
            let pkt = match received {
                Ok(pkt) => pkt,
                Err(DhcpError::Packet(e)) => {
                    debug!(error = %e, "ignoring malformed DHCP packet");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "DHCP server transport failed");
                    break;
                }
            };
            if let Some(reply) = self.server.handle_packet(&pkt, std::time::Instant::now()) {
                if let Err(e) = self.transport.send(&reply).await {
                    warn!(error = %e, "failed to send DHCP reply");
                }
            }
        }

        info!("DHCP server stopped");
    }
}
