//! Configuration builders for tests.
//!
//! [`TestConfigBuilder`] produces an [`AppConfig`] whose filesystem paths
//! can be redirected into a temp directory; [`TestConfigFile`] round-trips
//! a TOML document through [`AppConfig::load`].

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use wlinkd_config::{AppConfig, DhcpMode};

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let dir = TempDir::new().unwrap();
/// let config = TestConfigBuilder::new()
///     .paths_in(dir.path())
///     .apps(["sensor", "uploader"])
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    /// Put the control socket, supplicant socket dir, and network store
    /// under `dir`.
    pub fn paths_in(mut self, dir: &Path) -> Self {
        self.config.daemon.socket_path = dir.join("wlinkd.sock").display().to_string();
        self.config.supplicant.socket_dir = dir.join("sockets").display().to_string();
        self.config.network.path = dir.join("config.json").display().to_string();
        self
    }

    pub fn socket_path(mut self, path: &str) -> Self {
        self.config.daemon.socket_path = path.to_string();
        self
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.config.daemon.http_port = port;
        self
    }

    pub fn interface(mut self, iface: &str) -> Self {
        self.config.supplicant.interface = iface.to_string();
        self
    }

    pub fn supplicant_binary(mut self, binary: &str) -> Self {
        self.config.supplicant.binary = binary.to_string();
        self
    }

    pub fn startup_timeout_ms(mut self, ms: u64) -> Self {
        self.config.supplicant.startup_timeout_ms = ms;
        self
    }

    pub fn dhcp_mode(mut self, mode: DhcpMode) -> Self {
        self.config.dhcp.mode = mode;
        self
    }

    pub fn dhcp_retransmit_ms(mut self, ms: u64) -> Self {
        self.config.dhcp.retransmit_ms = ms;
        self
    }

    pub fn apps<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.apps.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A TOML config file in an owned temp directory, removed on drop.
pub struct TestConfigFile {
    pub path: PathBuf,
    dir: TempDir,
}

impl TestConfigFile {
    pub async fn with_toml(toml_content: &str) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("wlinkd.toml");
        tokio::fs::write(&path, toml_content)
            .await
            .expect("failed to write test config");
        Self { path, dir }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Parse the file; panics if it does not validate.
    pub async fn load(&self) -> AppConfig {
        AppConfig::load(&self.path)
            .await
            .expect("failed to parse test config")
    }
}
