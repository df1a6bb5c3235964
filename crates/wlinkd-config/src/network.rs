//! Persisted wireless network profile.
//!
//! The profile is stored as JSON under the `network_config` key so the
//! file can grow other top-level sections without breaking old readers.
//!
//! SSID and PSK are bounded owned text: anything that would not fit the
//! radio limits, or that could break the quoting of a supplicant command,
//! is rejected at construction instead of being truncated.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ConfigError;

/// Top-level JSON key holding the network profile.
pub const NETWORK_CONFIG_KEY: &str = "network_config";

/// Maximum SSID length in bytes (802.11).
pub const SSID_MAX_LEN: usize = 32;

/// WPA passphrase bounds in bytes.
pub const PSK_MIN_LEN: usize = 8;
pub const PSK_MAX_LEN: usize = 63;

/// Rejections for bounded text fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} is {len} bytes, limit is {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} is {len} bytes, minimum is {min}")]
    TooShort {
        field: &'static str,
        len: usize,
        min: usize,
    },

    #[error("{field} contains a quote or control character")]
    InvalidChar { field: &'static str },
}

fn check_chars(field: &'static str, value: &str) -> Result<(), TextError> {
    if value.chars().any(|c| c == '"' || c.is_control()) {
        return Err(TextError::InvalidChar { field });
    }
    Ok(())
}

/// A network name of at most [`SSID_MAX_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ssid(String);

impl Ssid {
    /// Validate a network name: non-empty, at most [`SSID_MAX_LEN`] bytes,
    /// no control characters or quotes.
    pub fn new(value: impl Into<String>) -> Result<Self, TextError> {
        let value = value.into();
        if value.is_empty() {
            return Err(TextError::Empty { field: "ssid" });
        }
        if value.len() > SSID_MAX_LEN {
            return Err(TextError::TooLong {
                field: "ssid",
                len: value.len(),
                max: SSID_MAX_LEN,
            });
        }
        check_chars("ssid", &value)?;
        Ok(Self(value))
    }

    /// The name as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Ssid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Ssid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ssid::new(raw).map_err(serde::de::Error::custom)
    }
}

/// A WPA passphrase. Wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Psk(String);

impl Psk {
    /// Validate a passphrase of [`PSK_MIN_LEN`]..=[`PSK_MAX_LEN`] bytes.
    /// Rejected input is wiped before returning.
    pub fn new(value: impl Into<String>) -> Result<Self, TextError> {
        let value = value.into();
        let len = value.len();
        if len < PSK_MIN_LEN {
            let mut value = value;
            value.zeroize();
            return Err(TextError::TooShort {
                field: "psk",
                len,
                min: PSK_MIN_LEN,
            });
        }
        if len > PSK_MAX_LEN {
            let mut value = value;
            value.zeroize();
            return Err(TextError::TooLong {
                field: "psk",
                len,
                max: PSK_MAX_LEN,
            });
        }
        if let Err(e) = check_chars("psk", &value) {
            let mut value = value;
            value.zeroize();
            return Err(e);
        }
        Ok(Self(value))
    }

    /// The passphrase text, for handing to the supplicant.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Psk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Psk([REDACTED])")
    }
}

impl Serialize for Psk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Psk {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Psk::new(raw).map_err(serde::de::Error::custom)
    }
}

/// SSID + pre-shared key for a WPA-PSK network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ssid: Ssid,
    pub psk: Psk,
}

impl NetworkConfig {
    /// Validate both parts of a network profile.
    pub fn new(ssid: &str, psk: &str) -> Result<Self, TextError> {
        Ok(Self {
            ssid: Ssid::new(ssid)?,
            psk: Psk::new(psk)?,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct StoredFile {
    #[serde(default, rename = "network_config", skip_serializing_if = "Option::is_none")]
    network_config: Option<NetworkConfig>,
}

/// Decode the contents of a network store file.
pub fn parse_stored(content: &str) -> Result<Option<NetworkConfig>, ConfigError> {
    let stored: StoredFile = serde_json::from_str(content)?;
    Ok(stored.network_config)
}

/// JSON file holding the last configured network profile.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    path: PathBuf,
}

impl NetworkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored profile.
    ///
    /// A missing file is not an error and yields `None`; unreadable or
    /// malformed content is.
    pub async fn load(&self) -> Result<Option<NetworkConfig>, ConfigError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored network config");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        parse_stored(&content)
    }

    /// Replace the stored profile.
    pub async fn save(&self, config: &NetworkConfig) -> Result<(), ConfigError> {
        let stored = StoredFile {
            network_config: Some(config.clone()),
        };
        let json = serde_json::to_vec_pretty(&stored)?;
        tokio::fs::write(&self.path, json).await?;
        info!(path = %self.path.display(), ssid = %config.ssid, "network config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_ssid_bounds() {
        assert!(Ssid::new("MyNetwork").is_ok());
        assert_eq!(
            Ssid::new("").unwrap_err(),
            TextError::Empty { field: "ssid" }
        );
        let long = "x".repeat(SSID_MAX_LEN + 1);
        assert!(matches!(
            Ssid::new(long),
            Err(TextError::TooLong { len: 33, .. })
        ));
        assert!(Ssid::new("x".repeat(SSID_MAX_LEN)).is_ok());
    }

    #[test]
    fn test_ssid_rejects_quotes_and_newlines() {
        assert!(matches!(
            Ssid::new("evil\" psk \"x"),
            Err(TextError::InvalidChar { .. })
        ));
        assert!(matches!(
            Ssid::new("two\nlines"),
            Err(TextError::InvalidChar { .. })
        ));
    }

    #[test]
    fn test_psk_bounds() {
        assert!(Psk::new("short").is_err());
        assert!(Psk::new("longenough").is_ok());
        assert!(Psk::new("p".repeat(PSK_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_psk_debug_is_redacted() {
        let config = NetworkConfig::new("home", "hunter2hunter2").unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("home"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_deserialize_rejects_oversized_ssid() {
        let json = format!(r#"{{"ssid": "{}", "psk": "longenough"}}"#, "s".repeat(40));
        assert!(serde_json::from_str::<NetworkConfig>(&json).is_err());
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = NetworkStore::new(tmp.path().join("config.json"));

        assert!(store.load().await.unwrap().is_none());

        let config = NetworkConfig::new("ghettonet", "correcthorse").unwrap();
        store.save(&config).await.unwrap();

        let raw = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert!(raw.contains(NETWORK_CONFIG_KEY));

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.ssid.as_str(), "ghettonet");
        assert_eq!(loaded.psk.expose(), "correcthorse");
    }

    #[tokio::test]
    async fn test_store_without_network_key() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        tokio::fs::write(&path, b"{}").await.unwrap();
        let store = NetworkStore::new(&path);
        assert!(store.load().await.unwrap().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_store_rejects_garbage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let store = NetworkStore::new(&path);
        assert!(matches!(store.load().await, Err(ConfigError::Json(_))));
    }
}
