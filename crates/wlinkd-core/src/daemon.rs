//! Daemon runtime: wires the supplicant, DHCP, control socket, and HTTP
//! façade together and tears them down in order.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use wlinkd_config::network::NetworkStore;
use wlinkd_config::{AppConfig, ConfigError, DhcpMode};

use crate::apps::AppHealth;
use crate::dhcp::packet::{CLIENT_PORT, SERVER_PORT};
use crate::dhcp::{
    DhcpClient, DhcpClientService, DhcpClientStatus, DhcpError, DhcpServer, DhcpServerService,
    LeasePool, UdpTransport,
};
use crate::http::{self, HttpState};
use crate::ipc::IpcServer;
use crate::netlink::{
    self, AddressConfigurator, LinkInfo, NetlinkError, RtNetlinkConfigurator, prefix_len,
};
use crate::status::{NetworkStatePublisher, StatusSources};
use crate::supplicant::{SupplicantAdapter, SupplicantError, SupplicantHandle, SupplicantService};

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// The wlinkd daemon.
pub struct Daemon {
    config: AppConfig,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    _shutdown_rx: broadcast::Receiver<ShutdownSignal>,
}

impl Daemon {
    pub fn new(config: AppConfig) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        Self {
            config,
            shutdown_tx,
            _shutdown_rx,
        }
    }

    /// Bring the link up and serve until a shutdown signal or Ctrl-C.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let iface = self.config.supplicant.interface.as_str();
        info!(
            interface = iface,
            version = %crate::build_info::version_string(),
            "wlinkd starting"
        );
        let http_addr = self.http_addr()?;

        match netlink::resolve_physical_index(iface).await {
            Ok(phy) => info!(interface = iface, phy, "wireless phy resolved"),
            Err(e) => warn!(interface = iface, error = %e, "no wireless phy for interface"),
        }
        let link = netlink::lookup_link(iface).await?;
        info!(interface = iface, index = link.index, mac = %link.mac, "interface found");

        // Supplicant first; everything else follows its link state. Without
        // one the link stays down but apps can still connect and report.
        let mut adapter = SupplicantAdapter::new();
        if let Err(e) = adapter.start(&self.config.supplicant).await {
            warn!(error = %e, "supplicant unavailable, link stays down");
            adapter.record_startup_failure(&e);
        }
        let (service, supplicant) = SupplicantService::new(adapter);
        let supplicant_task = tokio::spawn(service.run());

        let store = NetworkStore::new(&self.config.network.path);
        self.apply_stored_network(&store, &supplicant).await;

        let (dhcp_task, dhcp_rx) = match self.start_dhcp(link, &supplicant).await {
            Ok(started) => started,
            Err(e) => {
                stop_supplicant(&supplicant, supplicant_task).await;
                return Err(e);
            }
        };

        let (publisher, network_rx) =
            NetworkStatePublisher::new(supplicant.link_state(), dhcp_rx.clone());
        let publisher_task = tokio::spawn(publisher.run(self.shutdown_tx.subscribe()));

        let apps = Arc::new(Mutex::new(AppHealth::new(self.config.apps.names.iter().cloned())));
        let ipc = match IpcServer::bind(&self.config.daemon.socket_path, apps.clone(), network_rx) {
            Ok(ipc) => ipc,
            Err(e) => {
                let _ = self.shutdown_tx.send(ShutdownSignal);
                stop_supplicant(&supplicant, supplicant_task).await;
                return Err(e.into());
            }
        };
        let ipc_task = tokio::spawn(ipc.run(self.shutdown_tx.subscribe()));

        let http_state = Arc::new(HttpState {
            status: StatusSources {
                supplicant: supplicant.clone(),
                dhcp_rx,
                apps,
            },
            supplicant: supplicant.clone(),
            store,
        });
        let http_shutdown = self.shutdown_tx.subscribe();
        let http_task = tokio::spawn(async move {
            if let Err(e) = http::serve(http_addr, http_state, http_shutdown).await {
                warn!(error = %e, "HTTP façade failed");
            }
        });

        info!("wlinkd running");
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping daemon");
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received, initiating graceful shutdown");
                let _ = self.shutdown_tx.send(ShutdownSignal);
            }
        }

        for (name, task) in [
            ("control socket", ipc_task),
            ("HTTP façade", http_task),
            ("DHCP", dhcp_task),
            ("network state", publisher_task),
        ] {
            if let Err(e) = task.await {
                warn!(component = name, error = %e, "task ended abnormally");
            }
        }
        stop_supplicant(&supplicant, supplicant_task).await;

        info!("Daemon stopped");
        Ok(())
    }

    /// Request a graceful shutdown of the daemon.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Socket address of the HTTP façade.
    pub fn http_addr(&self) -> Result<SocketAddr, DaemonError> {
        let daemon = &self.config.daemon;
        format!("{}:{}", daemon.http_addr, daemon.http_port)
            .parse()
            .map_err(|e| {
                DaemonError::Startup(format!("invalid HTTP address {:?}: {e}", daemon.http_addr))
            })
    }

    async fn apply_stored_network(&self, store: &NetworkStore, supplicant: &SupplicantHandle) {
        match store.load().await {
            Ok(Some(network)) => {
                let ssid = network.ssid.clone();
                match supplicant.configure(network).await {
                    Ok(id) => info!(%ssid, network_id = id, "stored network applied"),
                    Err(e) => warn!(%ssid, error = %e, "stored network rejected"),
                }
            }
            Ok(None) => info!("no stored network, waiting for configuration"),
            Err(e) => warn!(path = %store.path().display(), error = %e, "stored network unreadable"),
        }
    }

    async fn start_dhcp(
        &self,
        link: LinkInfo,
        supplicant: &SupplicantHandle,
    ) -> Result<(JoinHandle<()>, Option<tokio::sync::watch::Receiver<DhcpClientStatus>>), DaemonError>
    {
        let iface = self.config.supplicant.interface.as_str();
        let dhcp = &self.config.dhcp;
        match dhcp.mode {
            DhcpMode::Client => {
                let transport = UdpTransport::bind(CLIENT_PORT, SERVER_PORT, Some(iface)).await?;
                let configurator = Arc::new(RtNetlinkConfigurator::connect()?);
                let client = DhcpClient::new(dhcp.max_attempts, dhcp.retransmit_interval());
                let (service, status_rx) = DhcpClientService::new(
                    client,
                    Box::new(transport),
                    configurator,
                    iface,
                    link,
                    supplicant.link_state(),
                );
                let task = tokio::spawn(service.run(self.shutdown_tx.subscribe()));
                Ok((task, Some(status_rx)))
            }
            DhcpMode::Server => {
                let pool = LeasePool::from(&dhcp.server);
                let configurator = RtNetlinkConfigurator::connect()?;
                if let Err(e) = configurator
                    .set_address(link.index, pool.server_id, prefix_len(pool.subnet_mask))
                    .await
                {
                    warn!(error = %e, "could not assign server address");
                }
                let transport = UdpTransport::bind(SERVER_PORT, CLIENT_PORT, Some(iface)).await?;
                let service = DhcpServerService::new(DhcpServer::new(pool), Box::new(transport));
                let task = tokio::spawn(service.run(self.shutdown_tx.subscribe()));
                Ok((task, None))
            }
            DhcpMode::Off => {
                info!("DHCP disabled");
                Ok((tokio::spawn(async {}), None))
            }
        }
    }
}

async fn stop_supplicant(handle: &SupplicantHandle, task: JoinHandle<()>) {
    if handle.shutdown().await.is_err() {
        warn!("supplicant service already gone");
    }
    if let Err(e) = task.await {
        warn!(error = %e, "supplicant service ended abnormally");
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon startup failed: {0}")]
    Startup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Supplicant(#[from] SupplicantError),

    #[error(transparent)]
    Netlink(#[from] NetlinkError),

    #[error(transparent)]
    Dhcp(#[from] DhcpError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_daemon_creation() {
        let daemon = Daemon::new(AppConfig::default());
        assert_eq!(daemon.config().daemon.http_port, 1338);
        assert_eq!(
            daemon.http_addr().unwrap(),
            "0.0.0.0:1338".parse::<SocketAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_daemon_shutdown() {
        let daemon = Daemon::new(AppConfig::default());
        let mut rx = daemon.shutdown_tx.subscribe();
        daemon.shutdown();
        assert!(rx.try_recv().is_ok());
        // Repeated requests are harmless.
        daemon.shutdown();
    }

    #[test]
    fn test_invalid_http_addr() {
        let mut config = AppConfig::default();
        config.daemon.http_addr = "not an address".to_string();
        let daemon = Daemon::new(config);
        assert!(matches!(daemon.http_addr(), Err(DaemonError::Startup(_))));
    }
}
