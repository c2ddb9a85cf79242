//! Disk-protocol client
//!
//! The host side of the repository contract. The protocol is deliberately
//! narrow (list, upload, destroy) and forgiving: an unreachable server
//! means "no repository available", not an error, and a transport failure
//! after a destroy request is treated as "probably succeeded" because the
//! serving process tears itself down as part of honoring the request.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};
use crate::package::Package;

use super::server::{DESTROY_ENDPOINT, LIST_ENDPOINT, UPLOAD_ENDPOINT};

/// Phases of the two-phase destructive delete, as observed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyPhase {
    /// The request has been issued but not yet acknowledged.
    Requested,
    /// The server acknowledged and is draining connections to release its
    /// file locks.
    Halting,
    /// The server is no longer answering; deletion has run (or the request
    /// outlived the process). An external supervisor restarts the server.
    Stopped,
}

impl fmt::Display for DestroyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestroyPhase::Requested => f.write_str("requested"),
            DestroyPhase::Halting => f.write_str("halting"),
            DestroyPhase::Stopped => f.write_str("stopped"),
        }
    }
}

/// The boundary contract between the host and the repository's physical
/// storage.
#[async_trait]
pub trait DiskProtocol: Send + Sync {
    /// Fetch every repository entry, or an empty list when no repository
    /// is reachable.
    async fn list(&self) -> Result<Vec<Package>>;

    /// Write (or overwrite, by sanitized id) a package to physical storage.
    async fn upload(&self, package: &Package) -> Result<()>;

    /// Issue the destructive delete for an id. Resolves to the phase the
    /// operation reached from the caller's point of view.
    async fn destroy(&self, id: &str) -> Result<DestroyPhase>;
}

#[derive(Debug, Deserialize)]
struct DestroyAck {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP implementation of the disk protocol.
#[derive(Debug, Clone)]
pub struct HttpRepositoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRepositoryClient {
    /// Client against a server base URL (e.g. `http://127.0.0.1:7420`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Poll until the server stops answering after a destroy request.
    ///
    /// Returns `Stopped` once the server is gone, or `Halting` if it is
    /// still draining when the timeout elapses.
    pub async fn wait_until_stopped(&self, timeout: Duration) -> Result<DestroyPhase> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.client.get(self.url(LIST_ENDPOINT)).send().await {
                Err(_) => {
                    info!(server = %self.base_url, "Server stopped");
                    return Ok(DestroyPhase::Stopped);
                }
                Ok(_) if tokio::time::Instant::now() >= deadline => {
                    return Ok(DestroyPhase::Halting);
                }
                Ok(_) => {
                    debug!(server = %self.base_url, "Still halting");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

#[async_trait]
impl DiskProtocol for HttpRepositoryClient {
    async fn list(&self) -> Result<Vec<Package>> {
        let response = match self.client.get(self.url(LIST_ENDPOINT)).send().await {
            Ok(response) => response,
            Err(e) => {
                // No repository available is a normal condition for a host
                // running without its serving process.
                debug!(server = %self.base_url, error = %e, "Repository unreachable");
                return Ok(Vec::new());
            }
        };
        if !response.status().is_success() {
            warn!(
                server = %self.base_url,
                status = %response.status(),
                "Repository refused listing, treating as empty"
            );
            return Ok(Vec::new());
        }
        let packages = response.json::<Vec<Package>>().await?;
        debug!(count = packages.len(), "Listed repository entries");
        Ok(packages)
    }

    async fn upload(&self, package: &Package) -> Result<()> {
        let body = json!({
            "id": package.id,
            "manifest": package.manifest,
            "files": package.files,
        });
        let response = self
            .client
            .post(self.url(UPLOAD_ENDPOINT))
            .json(&body)
            .send()
            .await
            .map_err(|e| HostError::Network(format!("upload failed: {}", e)))?;

        if response.status().is_success() {
            info!(plugin = %package.id, "Uploaded package to repository");
            return Ok(());
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| "upload rejected".to_string());
        Err(HostError::ServerIo(message))
    }

    async fn destroy(&self, id: &str) -> Result<DestroyPhase> {
        let response = match self
            .client
            .post(self.url(DESTROY_ENDPOINT))
            .query(&[("id", id)])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // The server tears itself down to honor destroys; losing
                // the connection here usually means it already worked.
                warn!(
                    plugin = id,
                    error = %e,
                    "Server unreachable after destroy request, assuming it succeeded"
                );
                return Ok(DestroyPhase::Stopped);
            }
        };

        if !response.status().is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| "destroy rejected".to_string());
            return Err(HostError::ServerIo(message));
        }

        let ack = response.json::<DestroyAck>().await?;
        info!(plugin = id, status = %ack.status, "Destroy acknowledged");
        Ok(DestroyPhase::Halting)
    }
}
