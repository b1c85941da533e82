//! Deluge Web JSON-RPC client.
//!
//! Adds announced torrents to a running Deluge daemon through its web UI
//! endpoint (`/json`). The session cookie from `auth.login` is kept by the
//! client's cookie store; an expired session is re-established once per call.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::DelugeConfig;
use crate::sink::{DeliveryError, Sink};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Deluge's error code for calls made without a valid session.
const NOT_AUTHENTICATED: i64 = 1;

#[derive(Debug, Error)]
pub enum DelugeError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Password rejected by Deluge web UI")]
    AuthRejected,
    #[error("No Deluge daemon configured in the web UI")]
    NoHost,
    #[error("Malformed RPC response: {0}")]
    Malformed(String),
}

impl DelugeError {
    /// Transport-level failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            DelugeError::Network(_) => true,
            DelugeError::HttpStatus(status) => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
    code: i64,
}

pub struct DelugeClient {
    client: reqwest::Client,
    endpoint: Url,
    password: SecretString,
    attempts: u32,
    retry_delay: Duration,
    next_id: u64,
    logged_in: bool,
}

impl DelugeClient {
    pub fn new(config: &DelugeConfig) -> Result<Self, DelugeError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.url.clone(),
            password: SecretString::from(config.password.expose_secret()),
            attempts: config.attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
            next_id: 0,
            logged_in: false,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value, DelugeError> {
        self.next_id += 1;
        let body = json!({ "method": method, "params": params, "id": self.next_id });

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DelugeError::HttpStatus(response.status().as_u16()));
        }

        let bytes = response.bytes().await?;
        let parsed: RpcResponse =
            serde_json::from_slice(&bytes).map_err(|e| DelugeError::Malformed(e.to_string()))?;

        match parsed.error {
            Some(err) => Err(DelugeError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(parsed.result),
        }
    }

    /// Authenticate and make sure the web UI is attached to a daemon.
    pub async fn login(&mut self) -> Result<(), DelugeError> {
        let password = self.password.expose_secret().to_string();
        let accepted = self.call("auth.login", json!([password])).await?;
        if accepted != Value::Bool(true) {
            return Err(DelugeError::AuthRejected);
        }
        tracing::debug!(endpoint = %self.endpoint, "Logged in to Deluge web UI");

        // Only a session attached to a daemon counts; otherwise the next add
        // starts over from login.
        self.ensure_connected().await?;
        self.logged_in = true;
        Ok(())
    }

    async fn ensure_connected(&mut self) -> Result<(), DelugeError> {
        if self.call("web.connected", json!([])).await? == Value::Bool(true) {
            return Ok(());
        }

        let hosts = self.call("web.get_hosts", json!([])).await?;
        let host_id = hosts
            .as_array()
            .and_then(|hosts| hosts.first())
            .and_then(|host| host.get(0))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(DelugeError::NoHost)?;

        tracing::info!(host = %host_id, "Connecting Deluge web UI to daemon");
        self.call("web.connect", json!([host_id])).await?;
        Ok(())
    }

    /// One attempt at `core.add_torrent_url`. Returns the torrent id, if the
    /// daemon reports one.
    pub async fn add_torrent_url(
        &mut self,
        url: &Url,
        download_location: &Path,
    ) -> Result<Option<String>, DelugeError> {
        if !self.logged_in {
            self.login().await?;
        }

        let params = json!([
            url.as_str(),
            { "download_location": download_location.to_string_lossy() }
        ]);

        let result = match self.call("core.add_torrent_url", params.clone()).await {
            Err(DelugeError::Rpc { code, .. }) if code == NOT_AUTHENTICATED => {
                tracing::debug!("Deluge session expired, logging in again");
                self.logged_in = false;
                self.login().await?;
                self.call("core.add_torrent_url", params).await?
            }
            other => other?,
        };

        Ok(result.as_str().map(str::to_string))
    }

    /// [`Self::add_torrent_url`], retried on transport-level failures up to
    /// the configured number of attempts.
    pub async fn add_with_retry(
        &mut self,
        url: &Url,
        download_location: &Path,
    ) -> Result<Option<String>, DelugeError> {
        let mut attempt = 1;
        loop {
            match self.add_torrent_url(url, download_location).await {
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    tracing::warn!(
                        url = %url,
                        attempt = attempt,
                        error = %e,
                        "Adding torrent failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// [`Sink`] that adds every announcement to Deluge under `dl_path`.
pub struct DelugeSink {
    client: DelugeClient,
    dl_path: PathBuf,
}

impl DelugeSink {
    pub fn new(client: DelugeClient, dl_path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dl_path: dl_path.into(),
        }
    }
}

#[async_trait]
impl Sink for DelugeSink {
    async fn emit(&mut self, title: &str, url: &Url) -> Result<(), DeliveryError> {
        let torrent_id = self.client.add_with_retry(url, &self.dl_path).await?;
        tracing::info!(
            title = %title,
            torrent_id = torrent_id.as_deref().unwrap_or("-"),
            "Added torrent to Deluge"
        );
        Ok(())
    }
}
