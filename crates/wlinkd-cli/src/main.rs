#![deny(unsafe_code)]

//! wlinkd CLI: runs the daemon and talks to a running one.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wlinkd_client::{LinkClient, StateCode};
use wlinkd_config::AppConfig;

/// wlinkd: Wi-Fi link, DHCP and app health daemon.
#[derive(Parser)]
#[command(name = "wlinkd", version = wlinkd_core::build_info::VERSION, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "wlinkd.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Base URL of the daemon's HTTP façade (default: derived from config).
    #[arg(long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the wlinkd daemon.
    Start,

    /// Show link, lease and app status of a running daemon.
    Status,

    /// Trigger a scan and list the last scan results.
    Scan,

    /// Store a network and hand it to the supplicant.
    Configure {
        /// Network name.
        #[arg(long)]
        ssid: String,

        /// WPA passphrase (8..=63 characters).
        #[arg(long, env = "WLINKD_PSK", hide_env_values = true)]
        psk: String,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Report an app's health over the control socket.
    Report {
        /// App slot index as listed in `apps.names`.
        #[arg(long)]
        app: u32,

        /// App state to report.
        #[arg(long, value_enum)]
        state: Option<ReportedState>,

        /// Error code sent with the app state.
        #[arg(long, default_value_t = 0)]
        error: u32,

        /// Report connectivity instead of (or as well as) app state.
        #[arg(long)]
        connectivity: Option<bool>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ReportedState {
    Ok,
    Err,
}

impl From<ReportedState> for StateCode {
    fn from(state: ReportedState) -> Self {
        match state {
            ReportedState::Ok => StateCode::Ok,
            ReportedState::Err => StateCode::Err,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    // -v overrides the configured level; RUST_LOG overrides both
    let filter = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let base = cli.url.clone().unwrap_or_else(|| base_url(&config));
    match cli.command {
        Commands::Start => cmd_start(config).await?,
        Commands::Status => cmd_status(&base).await?,
        Commands::Scan => cmd_scan(&base).await?,
        Commands::Configure { ssid, psk } => cmd_configure(&base, &ssid, &psk).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
        Commands::Report {
            app,
            state,
            error,
            connectivity,
        } => cmd_report(&config, app, state, error, connectivity).await?,
    }

    Ok(())
}

async fn cmd_start(config: AppConfig) -> Result<()> {
    info!("Starting wlinkd daemon");
    let daemon = wlinkd_core::Daemon::new(config);
    daemon.run().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

async fn cmd_status(base: &str) -> Result<()> {
    let status = get_json(&format!("{base}/status")).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_scan(base: &str) -> Result<()> {
    let body = get_json(&format!("{base}/scan")).await?;
    let results = body["scanresults"].as_array().cloned().unwrap_or_default();
    if results.is_empty() {
        println!("No networks found (scan results arrive asynchronously, retry shortly)");
        return Ok(());
    }
    println!("{:<17}  {:>5}  {:>4}  {:<32}  FLAGS", "BSSID", "FREQ", "RSSI", "SSID");
    for result in &results {
        println!("{}", format_scan_row(result));
    }
    Ok(())
}

async fn cmd_configure(base: &str, ssid: &str, psk: &str) -> Result<()> {
    let resp = reqwest::Client::new()
        .post(format!("{base}/configure"))
        .json(&serde_json::json!({ "ssid": ssid, "psk": psk }))
        .send()
        .await
        .with_context(|| format!("daemon unreachable at {base}"))?;
    let body = checked_json(resp).await?;
    println!("Network {ssid:?} configured (id {})", body["network_id"]);
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn cmd_report(
    config: &AppConfig,
    app: u32,
    state: Option<ReportedState>,
    error: u32,
    connectivity: Option<bool>,
) -> Result<()> {
    if state.is_none() && connectivity.is_none() {
        bail!("nothing to report: pass --state and/or --connectivity");
    }
    let mut client = LinkClient::new(&config.daemon.socket_path, app);
    client.connect().await?;
    if let Some(state) = state {
        client.send_app_state(state.into(), error).await?;
    }
    if let Some(connected) = connectivity {
        client.send_connectivity(connected).await?;
    }
    client.disconnect();
    println!("Reported app {app}");
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path).await.map_err(|e| anyhow::anyhow!(e))
    } else {
        Ok(AppConfig::default())
    }
}

/// HTTP base URL for a daemon running with `config` on this host.
fn base_url(config: &AppConfig) -> String {
    let host = match config.daemon.http_addr.as_str() {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "[::1]",
        other => other,
    };
    format!("http://{host}:{}", config.daemon.http_port)
}

async fn get_json(url: &str) -> Result<Value> {
    let resp = reqwest::get(url)
        .await
        .with_context(|| format!("daemon unreachable at {url}"))?;
    checked_json(resp).await
}

async fn checked_json(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let text = resp.text().await.context("reading response from daemon")?;
    if !status.is_success() {
        // axum rejections come back as plain text
        let error = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| body["error"].as_str().map(str::to_string))
            .unwrap_or(text);
        bail!("daemon returned {status}: {error}");
    }
    serde_json::from_str(&text).context("malformed response from daemon")
}

fn format_scan_row(result: &Value) -> String {
    let flags = result["flags"]
        .as_array()
        .map(|flags| {
            flags
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();
    format!(
        "{:<17}  {:>5}  {:>4}  {:<32}  {}",
        result["bssid"].as_str().unwrap_or("?"),
        result["frequency"].to_string(),
        result["rssi"].to_string(),
        result["ssid"].as_str().unwrap_or(""),
        flags
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wlinkd_test_utils::config::{TestConfigBuilder, TestConfigFile};

    #[test]
    fn test_base_url_from_config() {
        let config = TestConfigBuilder::new().http_port(8080).build();
        assert_eq!(base_url(&config), "http://127.0.0.1:8080");

        let mut config = AppConfig::default();
        config.daemon.http_addr = "192.168.4.1".to_string();
        assert_eq!(base_url(&config), "http://192.168.4.1:1338");
    }

    #[test]
    fn test_parse_report_args() {
        let cli = Cli::try_parse_from([
            "wlinkd", "report", "--app", "2", "--state", "err", "--error", "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Report {
                app, state, error, ..
            } => {
                assert_eq!(app, 2);
                assert_eq!(state, Some(ReportedState::Err));
                assert_eq!(error, 5);
            }
            _ => panic!("expected report"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_state() {
        assert!(
            Cli::try_parse_from(["wlinkd", "report", "--app", "0", "--state", "active"]).is_err()
        );
    }

    #[test]
    fn test_format_scan_row() {
        let row = format_scan_row(&serde_json::json!({
            "bssid": "aa:bb:cc:dd:ee:ff",
            "frequency": 2437,
            "rssi": -45,
            "flags": ["WPA2_PSK_CCMP", "ESS"],
            "ssid": "MyNetwork",
        }));
        assert!(row.starts_with("aa:bb:cc:dd:ee:ff   2437   -45  MyNetwork"));
        assert!(row.ends_with("WPA2_PSK_CCMP,ESS"));
    }

    #[tokio::test]
    async fn test_load_config_defaults_when_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.daemon.http_port, 1338);
    }

    #[test_log::test(tokio::test)]
    async fn test_load_config_from_file() {
        let file = TestConfigFile::with_toml("[daemon]\nhttp_port = 9000\n").await;
        let config = load_config(&file.path).await.unwrap();
        assert_eq!(config.daemon.http_port, 9000);
    }

    #[tokio::test]
    async fn test_report_requires_something_to_send() {
        let config = AppConfig::default();
        let err = cmd_report(&config, 0, None, 0, None).await.unwrap_err();
        assert!(err.to_string().contains("nothing to report"));
    }
}
