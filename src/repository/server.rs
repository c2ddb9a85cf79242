//! Repository serving process
//!
//! Exposes a [`DiskStore`] over the disk-synchronization protocol:
//!
//! - `GET  /list-plugins`    → JSON array of repository entries
//! - `POST /upload-plugin`   → write/overwrite a package by sanitized id
//! - `POST /destroy-plugin`  → two-phase destructive delete
//!
//! Destruction is the one operation that cannot be a plain request/response
//! exchange: the serving process may hold open file handles into the
//! package directory, so the handler only acknowledges with
//! `{"status":"halting"}` and schedules the deletion. The listener then
//! drains, the physical delete runs after the last connection closes, and
//! the process exits; an external supervisor is expected to restart it.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{HostError, Result};
use crate::package::{FileBlob, Package, PluginManifest};

use super::store::DiskStore;

/// Endpoint paths of the disk protocol.
pub const LIST_ENDPOINT: &str = "/list-plugins";
pub const UPLOAD_ENDPOINT: &str = "/upload-plugin";
pub const DESTROY_ENDPOINT: &str = "/destroy-plugin";

/// Body of an upload request: the package identity plus its virtual files.
#[derive(Debug, Deserialize)]
struct UploadRequest {
    id: String,
    manifest: PluginManifest,
    #[serde(default)]
    files: BTreeMap<String, FileBlob>,
}

#[derive(Debug, Deserialize)]
struct DestroyParams {
    id: String,
}

struct ServerState {
    store: DiskStore,
    halt_tx: watch::Sender<bool>,
    pending_destroy: std::sync::Mutex<Vec<String>>,
}

/// A bound repository server, ready to serve until interrupted or halted
/// by a destroy request.
pub struct RepositoryServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    halt_rx: watch::Receiver<bool>,
}

impl RepositoryServer {
    /// Bind the protocol endpoints on `addr` over the given store.
    pub async fn bind(addr: &str, store: DiskStore) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HostError::Network(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| HostError::Network(format!("failed to resolve bound address: {}", e)))?;

        let (halt_tx, halt_rx) = watch::channel(false);
        let state = Arc::new(ServerState {
            store,
            halt_tx,
            pending_destroy: std::sync::Mutex::new(Vec::new()),
        });

        Ok(Self {
            listener,
            local_addr,
            state,
            halt_rx,
        })
    }

    /// The address the server actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until interrupted (ctrl-c) or halted by a destroy request,
    /// then run any scheduled deletions and return. The caller's process is
    /// expected to exit afterwards; a supervisor restarts it.
    pub async fn serve(self) -> Result<()> {
        let app = build_router(self.state.clone());
        let mut halt_rx = self.halt_rx;

        info!(
            addr = %self.local_addr,
            root = %self.state.store.root().display(),
            "Repository server listening"
        );

        let shutdown = async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, shutting down");
                }
                changed = halt_rx.changed() => {
                    if changed.is_ok() {
                        info!("Halt requested, draining connections to release file locks");
                    }
                }
            }
        };

        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| HostError::Network(format!("server exited unexpectedly: {}", e)))?;

        // Connections are closed and locks released; now the physical
        // deletions scheduled by destroy requests can run.
        let pending = {
            let mut guard = self
                .state
                .pending_destroy
                .lock()
                .expect("destroy queue lock poisoned");
            std::mem::take(&mut *guard)
        };
        for id in pending {
            match self.state.store.destroy_package(&id) {
                Ok(true) => info!(plugin = %id, "Deleted package after halt"),
                Ok(false) => info!(plugin = %id, "Package already absent from disk"),
                Err(e) => error!(plugin = %id, error = %e, "Failed to delete package after halt"),
            }
        }

        info!("Repository server stopped, awaiting supervisor restart");
        Ok(())
    }
}

/// Bind and serve in one call; the convenience entry the CLI uses.
pub async fn run_server(addr: &str, store: DiskStore) -> Result<()> {
    RepositoryServer::bind(addr, store).await?.serve().await
}

fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route(LIST_ENDPOINT, get(handle_list))
        .route(UPLOAD_ENDPOINT, post(handle_upload))
        .route(DESTROY_ENDPOINT, post(handle_destroy))
        .with_state(state)
}

async fn handle_list(State(state): State<Arc<ServerState>>) -> Json<Vec<Package>> {
    Json(state.store.list_packages())
}

async fn handle_upload(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<UploadRequest>,
) -> impl IntoResponse {
    let package = Package {
        id: request.id,
        manifest: request.manifest,
        files: request.files,
        enabled: false,
    };
    match state.store.write_package(&package) {
        Ok(_) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => {
            warn!(plugin = %package.id, error = %e, "Upload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn handle_destroy(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<DestroyParams>,
) -> impl IntoResponse {
    info!(plugin = %params.id, "Destroy requested, scheduling halt");
    state
        .pending_destroy
        .lock()
        .expect("destroy queue lock poisoned")
        .push(params.id);
    // Ack first; the listener drains after this response is flushed.
    let _ = state.halt_tx.send(true);
    (StatusCode::OK, Json(json!({ "status": "halting" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{PluginKind, MAIN_MIME};
    use std::time::Duration;
    use tempfile::TempDir;

    fn make_package(id: &str) -> Package {
        let manifest = PluginManifest {
            id: id.to_string(),
            name: "Served".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            main: "index.js".to_string(),
            style: None,
            global_var: "Served".to_string(),
            kind: PluginKind::Tool,
        };
        let mut files = BTreeMap::new();
        files.insert(
            "index.js".to_string(),
            FileBlob::new(MAIN_MIME, b"served".to_vec()),
        );
        Package::new(manifest, files, false)
    }

    async fn spawn_server(store: DiskStore) -> (String, tokio::task::JoinHandle<Result<()>>) {
        let server = RepositoryServer::bind("127.0.0.1:0", store).await.unwrap();
        let base = format!("http://{}", server.local_addr());
        let handle = tokio::spawn(server.serve());
        (base, handle)
    }

    #[tokio::test]
    async fn test_list_empty_repository() {
        let tmp = TempDir::new().unwrap();
        let (base, handle) = spawn_server(DiskStore::new(tmp.path())).await;

        let listed: Vec<Package> = reqwest::get(format!("{}{}", base, LIST_ENDPOINT))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(listed.is_empty());

        handle.abort();
    }

    #[tokio::test]
    async fn test_upload_then_list() {
        let tmp = TempDir::new().unwrap();
        let (base, handle) = spawn_server(DiskStore::new(tmp.path())).await;
        let pkg = make_package("com.x.tool");

        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}{}", base, UPLOAD_ENDPOINT))
            .json(&serde_json::json!({
                "id": pkg.id,
                "manifest": pkg.manifest,
                "files": pkg.files,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], serde_json::json!(true));

        let listed: Vec<Package> = client
            .get(format!("{}{}", base, LIST_ENDPOINT))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "com.x.tool");
        assert!(!listed[0].enabled);

        handle.abort();
    }

    #[tokio::test]
    async fn test_upload_with_traversal_file_fails() {
        let tmp = TempDir::new().unwrap();
        let (base, handle) = spawn_server(DiskStore::new(tmp.path())).await;
        let mut pkg = make_package("com.x.tool");
        pkg.files.insert(
            "../escape.js".to_string(),
            FileBlob::new(MAIN_MIME, b"x".to_vec()),
        );

        let response = reqwest::Client::new()
            .post(format!("{}{}", base, UPLOAD_ENDPOINT))
            .json(&serde_json::json!({
                "id": pkg.id,
                "manifest": pkg.manifest,
                "files": pkg.files,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("escapes"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_destroy_acks_halting_then_stops_and_deletes() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        store.write_package(&make_package("com.x.tool")).unwrap();
        let (base, handle) = spawn_server(store.clone()).await;

        let response = reqwest::Client::new()
            .post(format!("{}{}?id=com.x.tool", base, DESTROY_ENDPOINT))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], serde_json::json!("halting"));

        // The serve task drains and performs the deletion before returning
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server did not stop after destroy")
            .unwrap()
            .unwrap();
        assert!(store.list_packages().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_missing_target_still_halts() {
        let tmp = TempDir::new().unwrap();
        let (base, handle) = spawn_server(DiskStore::new(tmp.path())).await;

        let response = reqwest::Client::new()
            .post(format!("{}{}?id=com.x.ghost", base, DESTROY_ENDPOINT))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server did not stop after destroy")
            .unwrap()
            .unwrap();
    }
}
