//! HTTP transport for the cluster API.
//!
//! Lists and bindings are plain JSON requests; watches are long-lived
//! responses streaming one JSON event per line. The watch request carries no
//! read timeout; disconnect detection is the stream ending.

use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::client::ClusterApi;
use crate::error::ClusterError;
use crate::types::{Binding, Node, Pod, WatchEvent};

/// Request timeout for list and bind calls. Watches are exempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Token file consulted when no credentials file is configured.
const IN_CLUSTER_TOKEN_PATH: &str = "/var/run/muster/token";

/// Watch channel depth before the reader applies backpressure.
const WATCH_BUFFER: usize = 256;

/// Connection settings for the cluster API.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    /// Base URL of the API, e.g. `https://cluster.internal:7070`.
    pub server: String,
    /// Bearer token; absent for unauthenticated endpoints.
    #[serde(default)]
    pub token: Option<String>,
}

impl Credentials {
    /// Load credentials from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ClusterError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ClusterError::Credentials(format!("read {}: {err}", path.display()))
        })?;
        let mut credentials: Credentials = serde_json::from_str(&raw)?;
        if credentials.server.is_empty() {
            return Err(ClusterError::Credentials(format!(
                "{}: server is required",
                path.display()
            )));
        }
        credentials.server = credentials.server.trim_end_matches('/').to_string();
        Ok(credentials)
    }

    /// Resolve credentials: an explicit file wins; otherwise fall back to
    /// in-cluster defaults (the configured API URL plus the well-known token
    /// file, when present).
    pub fn resolve(path: Option<&Path>, fallback_url: &str) -> Result<Self, ClusterError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let token = std::fs::read_to_string(IN_CLUSTER_TOKEN_PATH)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        Ok(Self {
            server: fallback_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

/// Cluster API client over HTTP.
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(credentials: Credentials) -> Result<Self, ClusterError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &credentials.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClusterError::Credentials("token is not a valid header".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: credentials.server,
        })
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ClusterError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// Open a watch stream and decode NDJSON events into a channel.
    ///
    /// The spawned reader exits when the stream ends or the receiver is
    /// dropped; the closed channel is the caller's disconnect signal.
    async fn watch<T>(&self, path: &str) -> Result<mpsc::Receiver<WatchEvent<T>>, ClusterError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        debug!(url = %url, "watch stream established");

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        tokio::spawn(async move {
            let bytes = response.bytes_stream().map_err(io::Error::other);
            let mut lines = BufReader::new(StreamReader::new(bytes)).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<WatchEvent<T>>(&line) {
                            Ok(event) => {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "failed to decode watch event, skipping line");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "watch stream read failed");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[async_trait]
impl ClusterApi for RestClient {
    async fn list_pods(&self) -> Result<Vec<Pod>, ClusterError> {
        self.list("/v1/pods").await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        self.list("/v1/nodes").await
    }

    async fn watch_pods(&self) -> Result<mpsc::Receiver<WatchEvent<Pod>>, ClusterError> {
        self.watch("/v1/watch/pods").await
    }

    async fn watch_nodes(&self) -> Result<mpsc::Receiver<WatchEvent<Node>>, ClusterError> {
        self.watch("/v1/watch/nodes").await
    }

    async fn bind_pod(&self, binding: &Binding) -> Result<(), ClusterError> {
        let url = format!(
            "{}/v1/namespaces/{}/pods/{}/binding",
            self.base_url, binding.namespace, binding.name
        );
        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(binding)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }
}

/// Map a non-success response to a typed error.
async fn api_error(response: reqwest::Response) -> ClusterError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    match status {
        StatusCode::CONFLICT => ClusterError::Conflict(message),
        StatusCode::NOT_FOUND => ClusterError::NotFound(message),
        _ => ClusterError::Api {
            status: status.as_u16(),
            message,
        },
    }
}
