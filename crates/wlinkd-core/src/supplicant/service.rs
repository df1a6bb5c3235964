//! Async supplicant service: one task owns the adapter and serializes
//! every command with event processing.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use wlinkd_config::network::NetworkConfig;

use super::SupplicantError;
use super::adapter::{LinkState, SupplicantAdapter, SupplicantStatus};
use super::parser::ScanResult;

/// Commands accepted by the [`SupplicantService`].
#[derive(Debug)]
pub enum SupplicantCommand {
    /// Trigger a scan.
    Scan {
        reply: oneshot::Sender<Result<(), SupplicantError>>,
    },
    /// Return the last scan-result set.
    ScanResults {
        reply: oneshot::Sender<Vec<ScanResult>>,
    },
    /// Add and select a network.
    Configure {
        config: NetworkConfig,
        reply: oneshot::Sender<Result<u32, SupplicantError>>,
    },
    /// Snapshot of the status section.
    Status {
        reply: oneshot::Sender<SupplicantStatus>,
    },
    /// Stop the supplicant and end the service loop.
    Shutdown,
}

/// The service task. Owns the adapter exclusively.
pub struct SupplicantService {
    adapter: SupplicantAdapter,
    command_rx: mpsc::Receiver<SupplicantCommand>,
}

/// Cloneable handle for talking to a running [`SupplicantService`].
#[derive(Clone)]
pub struct SupplicantHandle {
    command_tx: mpsc::Sender<SupplicantCommand>,
    link_rx: watch::Receiver<LinkState>,
}

impl SupplicantHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SupplicantCommand,
    ) -> Result<T, SupplicantError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(make(reply))
            .await
            .map_err(|_| SupplicantError::ChannelClosed)?;
        rx.await.map_err(|_| SupplicantError::ChannelClosed)
    }

    pub async fn scan(&self) -> Result<(), SupplicantError> {
        self.call(|reply| SupplicantCommand::Scan { reply }).await?
    }

    pub async fn scan_results(&self) -> Result<Vec<ScanResult>, SupplicantError> {
        self.call(|reply| SupplicantCommand::ScanResults { reply })
            .await
    }

    pub async fn configure(&self, config: NetworkConfig) -> Result<u32, SupplicantError> {
        self.call(|reply| SupplicantCommand::Configure { config, reply })
            .await?
    }

    pub async fn status(&self) -> Result<SupplicantStatus, SupplicantError> {
        self.call(|reply| SupplicantCommand::Status { reply }).await
    }

    /// Request the service to stop the supplicant and exit.
    pub async fn shutdown(&self) -> Result<(), SupplicantError> {
        self.command_tx
            .send(SupplicantCommand::Shutdown)
            .await
            .map_err(|_| SupplicantError::ChannelClosed)
    }

    /// Receive link-state changes.
    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.link_rx.clone()
    }
}

impl SupplicantService {
    /// Wrap a (usually started) adapter and return the service with its handle.
    pub fn new(adapter: SupplicantAdapter) -> (Self, SupplicantHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let handle = SupplicantHandle {
            command_tx,
            link_rx: adapter.subscribe(),
        };
        (Self { adapter, command_rx }, handle)
    }

    /// Run until [`SupplicantCommand::Shutdown`] or every handle is dropped.
    pub async fn run(mut self) {
        info!("supplicant service started");

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(SupplicantCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                event = self.adapter.next_event() => match event {
                    Ok(record) => self.adapter.handle_event(&record).await,
                    Err(e) => self.adapter.event_channel_failed(e),
                },
            }
        }

        self.adapter.stop().await;
        info!("supplicant service stopped");
    }

    async fn handle_command(&mut self, cmd: SupplicantCommand) {
        match cmd {
            SupplicantCommand::Scan { reply } => {
                let _ = reply.send(self.adapter.scan().await);
            }
            SupplicantCommand::ScanResults { reply } => {
                let _ = reply.send(self.adapter.scan_results().to_vec());
            }
            SupplicantCommand::Configure { config, reply } => {
                let result = self.adapter.configure(&config).await;
                if let Err(e) = &result {
                    debug!(error = %e, "configure failed");
                }
                let _ = reply.send(result);
            }
            SupplicantCommand::Status { reply } => {
                let _ = reply.send(self.adapter.dump_status());
            }
            SupplicantCommand::Shutdown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_service_shutdown() {
        let (service, handle) = SupplicantService::new(SupplicantAdapter::new());
        let task = tokio::spawn(service.run());
        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_without_supplicant() {
        let (service, handle) = SupplicantService::new(SupplicantAdapter::new());
        let task = tokio::spawn(service.run());

        let status = handle.status().await.unwrap();
        assert!(!status.connected);
        assert!(handle.scan_results().await.unwrap().is_empty());
        assert!(matches!(
            handle.scan().await,
            Err(SupplicantError::NotStarted)
        ));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_after_service_exit() {
        let (service, handle) = SupplicantService::new(SupplicantAdapter::new());
        drop(service);
        assert!(matches!(
            handle.status().await,
            Err(SupplicantError::ChannelClosed)
        ));
    }
}
