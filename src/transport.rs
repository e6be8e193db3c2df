//! Push transport: the sole network I/O boundary of the delivery engine.
//!
//! The engine depends only on the [`PushTransport`] trait; [`HttpTransport`]
//! is the production implementation. Tests substitute a fake, so nothing in
//! the retry machinery ever touches a real socket.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// One fully-built push request: encrypted body plus protocol headers.
///
/// Built fresh per attempt by [`crate::payload::PayloadEncryptor`] (each
/// attempt carries a fresh ephemeral key and authorization token).
#[derive(Clone, Debug)]
pub struct PushRequest {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Protocol headers: TTL, Urgency, Content-Encoding, Authorization.
    pub headers: Vec<(String, String)>,
    /// aes128gcm-encrypted payload.
    pub body: Vec<u8>,
}

/// What the push service answered.
///
/// The transport reports status verbatim; interpretation lives in
/// [`crate::outcome::classify_response`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` header, if the service sent one.
    pub retry_after: Option<Duration>,
}

/// Performs the actual network send.
///
/// Errors mean the request never produced a status (connection refused,
/// timeout); the engine treats those as transient.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// POST one push request to its endpoint.
    async fn send(&self, request: &PushRequest) -> Result<TransportResponse>;
}

/// Production transport over a shared `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with the given per-request timeout.
    ///
    /// The client is cheap to clone and pools connections; construct one
    /// and share it across dispatches.
    pub fn new(attempt_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(attempt_timeout)
            .user_agent(concat!("pushrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PushTransport for HttpTransport {
    async fn send(&self, request: &PushRequest) -> Result<TransportResponse> {
        let mut builder = self.client.post(&request.endpoint);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .context("Push request failed")?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            // Delay-seconds form only; the HTTP-date form is rare from push
            // services and falls back to local backoff.
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        Ok(TransportResponse {
            status,
            retry_after,
        })
    }
}
