//! Push subscription records.
//!
//! A subscription is the (endpoint URL, P-256 public key, auth secret)
//! triple a browser's push infrastructure hands out at registration time,
//! plus the delivery-tracking state the relay maintains for it.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key material from a browser push subscription (base64url encoded).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Browser's P-256 ECDH public key.
    pub p256dh: String,
    /// Shared auth secret.
    pub auth: String,
}

/// A registered push delivery target.
///
/// Invariants maintained by the store:
/// - `endpoint` is unique across all records.
/// - `failure_count` resets to 0 only on a successful delivery.
/// - `active` flips to false only via a permanent delivery failure and is
///   never flipped back automatically.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscription {
    /// Stable identity for store updates.
    pub id: Uuid,
    /// Push service endpoint URL (unique).
    pub endpoint: String,
    /// Encryption key material.
    pub keys: SubscriptionKeys,
    /// Whether the subscription still receives deliveries.
    pub active: bool,
    /// Consecutive failed deliveries since the last success.
    pub failure_count: u32,
    /// Timestamp of the last successful delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    /// Opaque caller-provided metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// The wire form a browser submits at registration:
/// `{endpoint, keys: {p256dh, auth}}`.
#[derive(Debug, Deserialize)]
struct WireSubscription {
    endpoint: String,
    keys: SubscriptionKeys,
}

impl Subscription {
    /// Create a fresh, active subscription.
    pub fn new(endpoint: impl Into<String>, p256dh: impl Into<String>, auth: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            keys: SubscriptionKeys {
                p256dh: p256dh.into(),
                auth: auth.into(),
            },
            active: true,
            failure_count: 0,
            last_success: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Parse a subscription from its browser wire form.
    ///
    /// Validates that the endpoint is a non-empty http(s) URL and that both
    /// key fields are present and non-empty. Key material is only decoded
    /// at payload-build time; a subscription with undecodable keys is
    /// deactivated on its first delivery attempt.
    pub fn from_wire(raw: &str) -> Result<Self> {
        let wire: WireSubscription =
            serde_json::from_str(raw).context("Subscription body is not valid JSON")?;
        anyhow::ensure!(
            wire.endpoint.starts_with("https://") || wire.endpoint.starts_with("http://"),
            "Subscription endpoint must be an http(s) URL"
        );
        anyhow::ensure!(
            !wire.keys.p256dh.is_empty() && !wire.keys.auth.is_empty(),
            "Subscription keys must include p256dh and auth"
        );
        Ok(Self::new(wire.endpoint, wire.keys.p256dh, wire.keys.auth))
    }
}
