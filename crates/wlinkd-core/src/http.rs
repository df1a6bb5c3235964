//! HTTP/JSON façade: status, scan, and network configuration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use wlinkd_config::network::{NetworkConfig, NetworkStore};

use crate::daemon::ShutdownSignal;
use crate::status::{StatusReport, StatusSources};
use crate::supplicant::{ScanResult, SupplicantError, SupplicantHandle};

/// Shared state for the route handlers.
pub struct HttpState {
    pub status: StatusSources,
    pub supplicant: SupplicantHandle,
    pub store: NetworkStore,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub scanresults: Vec<ScanResult>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigureRequest {
    pub ssid: String,
    pub psk: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigureResponse {
    pub network_id: u32,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn supplicant_error(e: SupplicantError) -> ApiError {
    api_error(StatusCode::BAD_GATEWAY, e)
}

pub fn router(state: Arc<HttpState>) -> axum::Router {
    axum::Router::new()
        .route("/status", get(handle_status))
        .route("/scan", get(handle_scan))
        .route("/configure", post(handle_configure))
        .with_state(state)
}

/// Serve the façade on `addr` until shutdown.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<HttpState>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP façade listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("HTTP façade shutting down");
        })
        .await
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_status(
    State(state): State<Arc<HttpState>>,
) -> Result<Json<StatusReport>, ApiError> {
    state
        .status
        .report()
        .await
        .map(Json)
        .map_err(supplicant_error)
}

async fn handle_scan(State(state): State<Arc<HttpState>>) -> Result<Json<ScanResponse>, ApiError> {
    // Results of this scan land later; serve the last complete set.
    if let Err(e) = state.supplicant.scan().await {
        warn!(error = %e, "scan request failed");
    }
    let scanresults = state
        .supplicant
        .scan_results()
        .await
        .map_err(supplicant_error)?;
    Ok(Json(ScanResponse { scanresults }))
}

async fn handle_configure(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ConfigureRequest>,
) -> Result<Json<ConfigureResponse>, ApiError> {
    let config = NetworkConfig::new(&req.ssid, &req.psk)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    state
        .store
        .save(&config)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    let network_id = state
        .supplicant
        .configure(config)
        .await
        .map_err(supplicant_error)?;
    info!(network_id, "network configured over HTTP");
    Ok(Json(ConfigureResponse { network_id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::AppHealth;
    use crate::supplicant::{SupplicantAdapter, SupplicantService};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// State backed by a supplicant service whose adapter was never started.
    fn test_state(dir: &TempDir) -> Arc<HttpState> {
        let (service, handle) = SupplicantService::new(SupplicantAdapter::new());
        tokio::spawn(service.run());
        Arc::new(HttpState {
            status: StatusSources {
                supplicant: handle.clone(),
                dhcp_rx: None,
                apps: Arc::new(Mutex::new(AppHealth::new(["sensor"]))),
            },
            supplicant: handle,
            store: NetworkStore::new(dir.path().join("config.json")),
        })
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn configure_request(body: &str) -> Request<Body> {
        Request::post("/configure")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));
        let resp = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["supplicant"]["connected"], false);
        assert!(json["supplicant"].get("lasterror").is_none());
        assert!(json.get("dhcp4").is_none());
        assert_eq!(json["apps"][0]["name"], "sensor");
        assert_eq!(json["daemon"]["version"], crate::build_info::VERSION);
    }

    #[tokio::test]
    async fn test_scan_endpoint_returns_last_set() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));
        let resp = app
            .oneshot(Request::get("/scan").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!({ "scanresults": [] }));
    }

    #[tokio::test]
    async fn test_configure_rejects_invalid_input() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));
        let resp = app
            .oneshot(configure_request(r#"{"ssid":"home","psk":"short"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(!dir.path().join("config.json").exists());
    }

    #[tokio::test]
    async fn test_configure_persists_then_reports_supplicant_failure() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = router(state.clone());
        let resp = app
            .oneshot(configure_request(
                r#"{"ssid":"home","psk":"correct horse battery"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let stored = state.store.load().await.unwrap().unwrap();
        assert_eq!(stored.ssid.as_str(), "home");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));
        let resp = app
            .oneshot(Request::get("/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
