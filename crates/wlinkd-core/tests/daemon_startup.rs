//! Daemon startup with a supplicant that cannot be launched.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::net::UnixStream;
use wlinkd_config::{AppConfig, DhcpMode};
use wlinkd_core::Daemon;
use wlinkd_core::ipc::{FrameReader, Message, StateCode, StatePair};

fn config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.daemon.socket_path = dir.path().join("wlinkd.sock").display().to_string();
    config.daemon.http_addr = "127.0.0.1".to_string();
    config.daemon.http_port = 0;
    config.supplicant.interface = "lo".to_string();
    config.supplicant.binary = "/nonexistent/wpa_supplicant".to_string();
    config.supplicant.socket_dir = dir.path().join("ctrl").display().to_string();
    config.dhcp.mode = DhcpMode::Off;
    config.network.path = dir.path().join("network.json").display().to_string();
    config
}

#[test_log::test(tokio::test)]
async fn test_daemon_serves_without_supplicant() {
    if let Err(e) = wlinkd_core::netlink::lookup_link("lo").await {
        eprintln!("skipping: loopback not visible over netlink: {e}");
        return;
    }
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let socket_path = dir.path().join("wlinkd.sock");

    let daemon = Arc::new(Daemon::new(config));
    let task = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run().await }
    });

    let stream = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(stream) = UnixStream::connect(&socket_path).await {
                break stream;
            }
            assert!(!task.is_finished(), "daemon exited during startup");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("control socket never came up");

    let mut reader = FrameReader::new(stream);
    let frame = tokio::time::timeout(Duration::from_secs(5), reader.read_frame())
        .await
        .expect("no network state pushed")
        .unwrap()
        .unwrap();
    match frame.message {
        Some(Message::NetworkState(state)) => {
            assert_eq!(state.supplicant, StatePair::new(StateCode::Inactive, 1));
        }
        other => panic!("expected network state, got {other:?}"),
    }

    daemon.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("daemon did not stop")
        .unwrap();
    assert!(result.is_ok());
}
