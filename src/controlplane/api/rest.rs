//! Docker Volume Plugin API
//!
//! Implements the Docker volume plugin protocol: every endpoint is a POST
//! with a JSON body, every failure answers HTTP 500 with `{"Err": "..."}`.

use crate::controlplane::orchestrator::{VolumeDriver, VolumeInfo};
use crate::error::{Error, Result};
use crate::metrics::PluginMetrics;
use axum::{
    body::Bytes,
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Content type of plugin protocol messages
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

/// Plugin subsystem announced on activation
pub const VOLUME_DRIVER: &str = "VolumeDriver";

// =============================================================================
// Request/Response Types
// =============================================================================

/// `/VolumeDriver.Create` request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    pub name: String,
    /// Docker sends `null` when no options were given
    #[serde(default)]
    pub opts: Option<BTreeMap<String, String>>,
}

/// Request carrying only a volume name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NameRequest {
    pub name: String,
}

/// `/VolumeDriver.Mount` and `/VolumeDriver.Unmount` request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountRequest {
    pub name: String,
    /// Caller id, unique per mount
    #[serde(rename = "ID", default)]
    pub id: String,
}

/// Response carrying only the error string
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrResponse {
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountResponse {
    pub mountpoint: String,
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeEntry {
    pub name: String,
    pub mountpoint: String,
}

impl From<VolumeInfo> for VolumeEntry {
    fn from(info: VolumeInfo) -> Self {
        Self {
            name: info.name,
            mountpoint: info.mountpoint,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    pub volume: VolumeEntry,
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    pub volumes: Vec<VolumeEntry>,
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesEntry {
    pub scope: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub capabilities: CapabilitiesEntry,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
}

// =============================================================================
// Plugin Router
// =============================================================================

/// Builds the Axum routers for the plugin and metrics endpoints
pub struct PluginRouter {
    driver: Arc<VolumeDriver>,
    metrics: PluginMetrics,
}

impl PluginRouter {
    pub fn new(driver: Arc<VolumeDriver>, metrics: PluginMetrics) -> Self {
        Self { driver, metrics }
    }

    /// Router serving the plugin protocol
    pub fn build(&self) -> Router {
        let state = AppState {
            driver: self.driver.clone(),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/Plugin.Activate", post(activate))
            .route("/VolumeDriver.Create", post(create_volume))
            .route("/VolumeDriver.Remove", post(remove_volume))
            .route("/VolumeDriver.Mount", post(mount_volume))
            .route("/VolumeDriver.Path", post(volume_path))
            .route("/VolumeDriver.Unmount", post(unmount_volume))
            .route("/VolumeDriver.Get", post(get_volume))
            .route("/VolumeDriver.List", post(list_volumes))
            .route("/VolumeDriver.Capabilities", post(capabilities))
            .with_state(state)
    }

    /// Router serving `/metrics` in the Prometheus text format
    pub fn metrics(&self) -> Router {
        Router::new()
            .route("/metrics", get(render_metrics))
            .with_state(self.metrics.clone())
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    driver: Arc<VolumeDriver>,
    metrics: PluginMetrics,
}

impl AppState {
    /// Run one operation, recording its outcome
    async fn run<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = call.await;
        let error = result.as_ref().err();
        if let Some(e) = error {
            warn!(operation, kind = e.kind().as_str(), error = %e, "Request failed");
        }
        self.metrics.observe(operation, error, started.elapsed());
        result
    }
}

// =============================================================================
// Response Helpers
// =============================================================================

fn reply<T: Serialize>(status: StatusCode, body: T) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)],
        Json(body),
    )
        .into_response()
}

fn ok<T: Serialize>(body: T) -> Response {
    reply(StatusCode::OK, body)
}

fn failure(e: Error) -> Response {
    reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrResponse { err: e.to_string() },
    )
}

/// Decode a request body; Docker does not always send a content type
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

// =============================================================================
// Handlers
// =============================================================================

/// Handshake
async fn activate() -> Response {
    debug!("Plugin activated");
    ok(ActivateResponse {
        implements: vec![VOLUME_DRIVER.to_string()],
    })
}

async fn create_volume(State(state): State<AppState>, body: Bytes) -> Response {
    let result = state
        .run("create", async {
            let request: CreateRequest = decode(&body)?;
            info!(volume = %request.name, "Create requested");
            let options = request.opts.unwrap_or_default();
            state.driver.create(&request.name, &options).await
        })
        .await;

    match result {
        Ok(()) => ok(ErrResponse::default()),
        Err(e) => failure(e),
    }
}

async fn remove_volume(State(state): State<AppState>, body: Bytes) -> Response {
    let result = state
        .run("remove", async {
            let request: NameRequest = decode(&body)?;
            info!(volume = %request.name, "Remove requested");
            state.driver.remove(&request.name).await
        })
        .await;

    match result {
        Ok(()) => ok(ErrResponse::default()),
        Err(e) => failure(e),
    }
}

async fn mount_volume(State(state): State<AppState>, body: Bytes) -> Response {
    let result = state
        .run("mount", async {
            let request: MountRequest = decode(&body)?;
            info!(volume = %request.name, id = %request.id, "Mount requested");
            state.driver.mount(&request.name).await
        })
        .await;

    match result {
        Ok(mountpoint) => ok(MountResponse {
            mountpoint: mountpoint.display().to_string(),
            err: String::new(),
        }),
        Err(e) => failure(e),
    }
}

async fn volume_path(State(state): State<AppState>, body: Bytes) -> Response {
    let result = state
        .run("path", async {
            let request: NameRequest = decode(&body)?;
            Ok::<_, Error>(state.driver.path(&request.name).await)
        })
        .await;

    match result {
        Ok(mountpoint) => ok(MountResponse {
            mountpoint,
            err: String::new(),
        }),
        Err(e) => failure(e),
    }
}

async fn unmount_volume(State(state): State<AppState>, body: Bytes) -> Response {
    let result = state
        .run("unmount", async {
            let request: MountRequest = decode(&body)?;
            info!(volume = %request.name, id = %request.id, "Unmount requested");
            state.driver.unmount(&request.name).await
        })
        .await;

    match result {
        Ok(()) => ok(ErrResponse::default()),
        Err(e) => failure(e),
    }
}

async fn get_volume(State(state): State<AppState>, body: Bytes) -> Response {
    let result = state
        .run("get", async {
            let request: NameRequest = decode(&body)?;
            state.driver.get(&request.name).await
        })
        .await;

    match result {
        Ok(volume) => ok(GetResponse {
            volume: volume.into(),
            err: String::new(),
        }),
        Err(e) => failure(e),
    }
}

async fn list_volumes(State(state): State<AppState>) -> Response {
    match state.run("list", state.driver.list()).await {
        Ok(volumes) => ok(ListResponse {
            volumes: volumes.into_iter().map(VolumeEntry::from).collect(),
            err: String::new(),
        }),
        Err(e) => failure(e),
    }
}

async fn capabilities(State(state): State<AppState>) -> Response {
    ok(CapabilitiesResponse {
        capabilities: CapabilitiesEntry {
            scope: state.driver.capabilities().scope,
        },
    })
}

async fn render_metrics(State(metrics): State<PluginMetrics>) -> Response {
    match metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::orchestrator::DriverConfig;
    use crate::domain::fakes::{FakeController, FakeMounter};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use tower::ServiceExt;

    struct Harness {
        controller: Arc<FakeController>,
        mounter: Arc<FakeMounter>,
        metrics: PluginMetrics,
        router: Router,
    }

    fn harness() -> Harness {
        let controller = Arc::new(FakeController::new());
        let mounter = Arc::new(FakeMounter::new());
        let config = DriverConfig {
            node: "node-a".into(),
            root: PathBuf::from("/mnt/linstor"),
            defaults: BTreeMap::new(),
        };
        let driver = VolumeDriver::new(config, controller.clone(), mounter.clone());
        let metrics = PluginMetrics::new().unwrap();
        let router = PluginRouter::new(driver, metrics.clone()).build();
        Harness {
            controller,
            mounter,
            metrics,
            router,
        }
    }

    async fn call(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_activate() {
        let h = harness();
        let (status, body) = call(&h.router, "/Plugin.Activate", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Implements": ["VolumeDriver"]}));
    }

    #[tokio::test]
    async fn test_capabilities() {
        let h = harness();
        let (_, body) = call(&h.router, "/VolumeDriver.Capabilities", json!({})).await;
        assert_eq!(body, json!({"Capabilities": {"Scope": "global"}}));
    }

    #[tokio::test]
    async fn test_volume_lifecycle() {
        let h = harness();

        let (status, body) = call(
            &h.router,
            "/VolumeDriver.Create",
            json!({"Name": "web", "Opts": {"size": "1G", "nodes": "node-b"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Err": ""}));

        let (_, body) = call(
            &h.router,
            "/VolumeDriver.Mount",
            json!({"Name": "web", "ID": "c1"}),
        )
        .await;
        assert_eq!(body["Mountpoint"], "/mnt/linstor/web/data");
        assert_eq!(body["Err"], "");

        let (_, body) = call(&h.router, "/VolumeDriver.Get", json!({"Name": "web"})).await;
        assert_eq!(
            body["Volume"],
            json!({"Name": "web", "Mountpoint": "/mnt/linstor/web/data"})
        );

        let (_, body) = call(&h.router, "/VolumeDriver.List", json!({})).await;
        assert_eq!(body["Volumes"].as_array().map(Vec::len), Some(1));

        let (_, body) = call(
            &h.router,
            "/VolumeDriver.Unmount",
            json!({"Name": "web", "ID": "c1"}),
        )
        .await;
        assert_eq!(body, json!({"Err": ""}));
        assert!(h.controller.resource("web", "node-a").is_none());

        let (_, body) = call(&h.router, "/VolumeDriver.Path", json!({"Name": "web"})).await;
        assert_eq!(body["Mountpoint"], "");

        let (status, _) = call(&h.router, "/VolumeDriver.Remove", json!({"Name": "web"})).await;
        assert_eq!(status, StatusCode::OK);
        assert!(h.controller.definition("web").is_none());

        assert_eq!(h.metrics.count("mount", "ok"), 1);
    }

    #[tokio::test]
    async fn test_null_opts_use_defaults() {
        let h = harness();

        let (status, _) = call(
            &h.router,
            "/VolumeDriver.Create",
            json!({"Name": "web", "Opts": null}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            h.controller.volume_definition("web").map(|v| v.size_kib),
            Some(100 * 1024)
        );
    }

    #[tokio::test]
    async fn test_errors_answer_500_with_err() {
        let h = harness();

        let (status, body) = call(&h.router, "/VolumeDriver.Get", json!({"Name": "ghost"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({"Err": "Volume 'ghost' is not managed by this plugin"})
        );
        assert_eq!(h.metrics.count("get", "ownership"), 1);

        let (status, body) = call(
            &h.router,
            "/VolumeDriver.Create",
            json!({"Name": "web", "Opts": {"size": "huge"}}),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["Err"].as_str().unwrap().contains("huge"));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let h = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/VolumeDriver.Remove")
            .body(Body::from("not json"))
            .unwrap();

        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(h.mounter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let h = harness();
        call(&h.router, "/VolumeDriver.List", json!({})).await;

        let router = PluginRouter::new(
            VolumeDriver::new(
                DriverConfig::default(),
                h.controller.clone(),
                h.mounter.clone(),
            ),
            h.metrics.clone(),
        )
        .metrics();
        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("operation=\"list\""));
    }
}
