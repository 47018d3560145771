//! Hub control plane.
//!
//! The handshake talks to two request/response endpoints. [`ControlPlane`]
//! is the seam between the handshake logic and the HTTP mechanics so tests
//! can drive the handshake against an in-process hub.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::{config::ClientOptions, error::HandshakeError};

/// Status-coded envelope returned by every control-plane endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubResponse {
    /// `1` on success; anything else is a rejection.
    #[serde(rename = "returnCode", alias = "ReturnCode")]
    pub return_code: i32,
    /// Base64 payload on success, human-readable message otherwise.
    #[serde(alias = "Data", default)]
    pub data: String,
}

impl HubResponse {
    /// Return code signalling success.
    pub const SUCCESS: i32 = 1;

    /// Successful response carrying `payload` base64-encoded.
    pub fn success(payload: &[u8]) -> Self {
        Self { return_code: Self::SUCCESS, data: STANDARD.encode(payload) }
    }

    /// Rejection carrying a message.
    pub fn rejected(code: i32, message: impl Into<String>) -> Self {
        Self { return_code: code, data: message.into() }
    }

    /// Decoded payload of a successful response.
    pub fn into_payload(self) -> Result<Vec<u8>, HandshakeError> {
        if self.return_code != Self::SUCCESS {
            return Err(HandshakeError::Rejected { code: self.return_code, message: self.data });
        }
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| HandshakeError::Decode { reason: format!("invalid base64: {e}") })
    }
}

/// Request/response endpoints of the hub.
#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    /// `GET {host}/public-key`
    async fn public_key(&self) -> Result<HubResponse, HandshakeError>;

    /// `POST {host}/conn/register` with a base64 body.
    async fn register(&self, body: String) -> Result<HubResponse, HandshakeError>;
}

/// Control plane over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    http: reqwest::Client,
    host: String,
    version: String,
}

impl HttpControlPlane {
    /// Client for the hub at `host`, applying the request timeout from
    /// `options` to every call.
    pub fn new(host: &str, options: &ClientOptions) -> Result<Self, HandshakeError> {
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| HandshakeError::Request { reason: e.to_string() })?;
        Ok(Self {
            http,
            host: host.trim_end_matches('/').to_string(),
            version: options.version.clone(),
        })
    }

    async fn parse(response: reqwest::Response) -> Result<HubResponse, HandshakeError> {
        let status = response.status();
        response.json::<HubResponse>().await.map_err(|e| HandshakeError::Decode {
            reason: format!("unexpected response (HTTP {status}): {e}"),
        })
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn public_key(&self) -> Result<HubResponse, HandshakeError> {
        let response = self
            .http
            .get(format!("{}/public-key", self.host))
            .send()
            .await
            .map_err(|e| HandshakeError::Request { reason: e.to_string() })?;
        Self::parse(response).await
    }

    async fn register(&self, body: String) -> Result<HubResponse, HandshakeError> {
        let response = self
            .http
            .post(format!("{}/conn/register", self.host))
            .header("Version", &self.version)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| HandshakeError::Request { reason: e.to_string() })?;
        Self::parse(response).await
    }
}
