#![deny(unsafe_code)]

//! Configuration loading and validation for wlinkd.
//!
//! Loads the TOML daemon configuration ([`AppConfig`]) and provides the
//! [`network`] module for the persisted wireless network profile (JSON).

/// Persisted wireless network profile and its bounded text types.
pub mod network;

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use network::{NetworkConfig, NetworkStore, Psk, Ssid, TextError};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Control socket and HTTP façade.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Wireless supplicant process and control sockets.
    #[serde(default)]
    pub supplicant: SupplicantConfig,

    /// DHCPv4 client/server behaviour.
    #[serde(default)]
    pub dhcp: DhcpConfig,

    /// Applications reporting health over the control socket.
    #[serde(default)]
    pub apps: AppsConfig,

    /// Persisted network profile location.
    #[serde(default)]
    pub network: NetworkStoreConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the daemon's local endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket path carrying the binary control protocol.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Address the HTTP status/configure façade binds to.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Port of the HTTP façade.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            http_addr: default_http_addr(),
            http_port: default_http_port(),
        }
    }
}

fn default_socket_path() -> String {
    "/tmp/wlinkd.sock".to_string()
}

fn default_http_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    1338
}

/// How the supplicant process is launched and reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplicantConfig {
    /// Path to the `wpa_supplicant` binary.
    #[serde(default = "default_supplicant_binary")]
    pub binary: String,

    /// Driver backend passed as `-D<driver>`.
    #[serde(default = "default_supplicant_driver")]
    pub driver: String,

    /// Directory holding the per-interface control sockets.
    #[serde(default = "default_supplicant_socket_dir")]
    pub socket_dir: String,

    /// Wireless interface to manage.
    #[serde(default = "default_supplicant_interface")]
    pub interface: String,

    /// How long to wait for the control socket to appear after spawning.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Upper bound on a single command round-trip.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl SupplicantConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for SupplicantConfig {
    fn default() -> Self {
        Self {
            binary: default_supplicant_binary(),
            driver: default_supplicant_driver(),
            socket_dir: default_supplicant_socket_dir(),
            interface: default_supplicant_interface(),
            startup_timeout_ms: default_startup_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

fn default_supplicant_binary() -> String {
    "/sbin/wpa_supplicant".to_string()
}

fn default_supplicant_driver() -> String {
    "nl80211".to_string()
}

fn default_supplicant_socket_dir() -> String {
    "/tmp/wlinkd_sockets".to_string()
}

fn default_supplicant_interface() -> String {
    "wlan0".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    5_000
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

/// Which DHCPv4 role the daemon plays on the managed interface.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DhcpMode {
    /// Acquire a lease once the supplicant reports a connection.
    #[default]
    Client,
    /// Hand out leases from [`DhcpServerConfig`] (access-point mode).
    Server,
    /// Leave addressing to something else.
    Off,
}

/// DHCPv4 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpConfig {
    #[serde(default)]
    pub mode: DhcpMode,

    /// Transmissions per negotiation phase before the client gives up.
    #[serde(default = "default_dhcp_max_attempts")]
    pub max_attempts: u32,

    /// Delay between retransmissions.
    #[serde(default = "default_dhcp_retransmit_ms")]
    pub retransmit_ms: u64,

    /// Address pool used in server mode.
    #[serde(default)]
    pub server: DhcpServerConfig,
}

impl DhcpConfig {
    pub fn retransmit_interval(&self) -> Duration {
        Duration::from_millis(self.retransmit_ms)
    }
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            mode: DhcpMode::default(),
            max_attempts: default_dhcp_max_attempts(),
            retransmit_ms: default_dhcp_retransmit_ms(),
            server: DhcpServerConfig::default(),
        }
    }
}

fn default_dhcp_max_attempts() -> u32 {
    4
}

fn default_dhcp_retransmit_ms() -> u64 {
    3_000
}

/// Static description of the server-mode address pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpServerConfig {
    #[serde(default = "default_server_id")]
    pub server_id: Ipv4Addr,

    #[serde(default = "default_pool_start")]
    pub pool_start: Ipv4Addr,

    #[serde(default = "default_pool_len")]
    pub pool_len: u32,

    #[serde(default = "default_subnet_mask")]
    pub subnet_mask: Ipv4Addr,

    #[serde(default = "default_server_id")]
    pub gateway: Ipv4Addr,

    #[serde(default = "default_lease_secs")]
    pub lease_secs: u32,
}

impl Default for DhcpServerConfig {
    fn default() -> Self {
        Self {
            server_id: default_server_id(),
            pool_start: default_pool_start(),
            pool_len: default_pool_len(),
            subnet_mask: default_subnet_mask(),
            gateway: default_server_id(),
            lease_secs: default_lease_secs(),
        }
    }
}

fn default_server_id() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 1)
}

fn default_pool_start() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 2)
}

fn default_pool_len() -> u32 {
    5
}

fn default_subnet_mask() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 248)
}

fn default_lease_secs() -> u32 {
    3_600
}

/// Applications known to the daemon. Position in `names` is the wire index.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppsConfig {
    #[serde(default)]
    pub names: Vec<String>,
}

/// Where the wireless network profile is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStoreConfig {
    #[serde(default = "default_network_store_path")]
    pub path: String,
}

impl Default for NetworkStoreConfig {
    fn default() -> Self {
        Self {
            path: default_network_store_path(),
        }
    }
}

fn default_network_store_path() -> String {
    "./config.json".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL).
const MAX_IFNAME_LEN: usize = 15;

/// App indices travel as a single byte in older clients.
const MAX_APPS: usize = 255;

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.socket_path.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.socket_path must not be empty".to_string(),
            ));
        }
        if self.daemon.http_port == 0 {
            return Err(ConfigError::Validation(
                "daemon.http_port must be non-zero".to_string(),
            ));
        }

        let iface = &self.supplicant.interface;
        if iface.is_empty() || iface.len() > MAX_IFNAME_LEN || iface.contains('/') {
            return Err(ConfigError::Validation(format!(
                "supplicant.interface must be 1..={MAX_IFNAME_LEN} bytes without '/', got {iface:?}"
            )));
        }
        if self.supplicant.startup_timeout_ms == 0 || self.supplicant.command_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "supplicant timeouts must be non-zero".to_string(),
            ));
        }

        if self.dhcp.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "dhcp.max_attempts must be at least 1".to_string(),
            ));
        }
        let pool = &self.dhcp.server;
        if pool.pool_len == 0 {
            return Err(ConfigError::Validation(
                "dhcp.server.pool_len must be at least 1".to_string(),
            ));
        }
        let mask = u32::from(pool.subnet_mask);
        if mask.leading_ones() + mask.trailing_zeros() != 32 {
            return Err(ConfigError::Validation(format!(
                "dhcp.server.subnet_mask {} is not contiguous",
                pool.subnet_mask
            )));
        }
        let start = u32::from(pool.pool_start);
        let Some(last) = start.checked_add(pool.pool_len - 1) else {
            return Err(ConfigError::Validation(
                "dhcp.server pool overflows the address space".to_string(),
            ));
        };
        if start & mask != last & mask || start & mask != u32::from(pool.server_id) & mask {
            return Err(ConfigError::Validation(
                "dhcp.server pool and server_id must share one subnet".to_string(),
            ));
        }

        if self.apps.names.len() > MAX_APPS {
            return Err(ConfigError::Validation(format!(
                "at most {MAX_APPS} apps are supported, got {}",
                self.apps.names.len()
            )));
        }
        for (i, name) in self.apps.names.iter().enumerate() {
            if name.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "apps.names[{i}] must not be empty"
                )));
            }
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
