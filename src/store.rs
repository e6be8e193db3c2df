//! Subscription storage.
//!
//! The delivery engine consumes storage through the [`SubscriptionStore`]
//! trait; [`MemoryStore`] is the provided implementation, with JSON
//! persistence so subscriptions survive process restarts.
//!
//! Implementations must linearize per-subscription updates: two concurrent
//! dispatches touching the same record apply conditional (version-compared)
//! updates internally and retry stale-version conflicts themselves — a
//! conflict never surfaces as a delivery error.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::subscription::Subscription;

/// Storage operations the delivery engine depends on.
///
/// All methods tolerate concurrent callers. Updates are idempotent:
/// applying the same outcome twice leaves the record in the same state.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// All subscriptions currently eligible for delivery.
    async fn list_active(&self) -> Result<Vec<Subscription>>;

    /// Record a successful delivery: reset the failure count to 0 and
    /// stamp the last-success time. Leaves `active` untouched.
    async fn update_on_success(&self, id: Uuid) -> Result<()>;

    /// Atomically increment the failure count, returning the new count.
    async fn increment_failure(&self, id: Uuid) -> Result<u32>;

    /// Mark the subscription inactive. Never reversed automatically.
    async fn deactivate(&self, id: Uuid) -> Result<()>;
}

/// One stored record plus its update version.
///
/// The version bumps on every mutation; [`MemoryStore`] compares it when
/// applying read-modify-write updates so a concurrent writer is detected
/// and the update re-applied against the fresh record.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct VersionedRecord {
    subscription: Subscription,
    version: u64,
}

/// In-memory subscription store with JSON persistence.
///
/// Records are keyed by subscription id and deduplicated by endpoint:
/// inserting a subscription whose endpoint already exists replaces the
/// old record, so a browser re-registering the same push subscription
/// never receives duplicate notifications.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Uuid, VersionedRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a subscription, deduplicating by endpoint.
    pub async fn insert(&self, subscription: Subscription) {
        let mut records = self.records.lock().await;

        let stale_id = records
            .iter()
            .find(|(id, r)| **id != subscription.id && r.subscription.endpoint == subscription.endpoint)
            .map(|(id, _)| *id);

        if let Some(id) = stale_id {
            log::info!(
                "[Push] Replacing subscription {} (same endpoint re-registered as {})",
                id,
                subscription.id
            );
            records.remove(&id);
        }

        records.insert(
            subscription.id,
            VersionedRecord {
                subscription,
                version: 0,
            },
        );
    }

    /// Remove a subscription by id.
    pub async fn remove(&self, id: Uuid) -> bool {
        self.records.lock().await.remove(&id).is_some()
    }

    /// Fetch a snapshot of one subscription.
    pub async fn get(&self, id: Uuid) -> Option<Subscription> {
        self.records
            .lock()
            .await
            .get(&id)
            .map(|r| r.subscription.clone())
    }

    /// Snapshot of every stored subscription, active or not.
    pub async fn all(&self) -> Vec<Subscription> {
        self.records
            .lock()
            .await
            .values()
            .map(|r| r.subscription.clone())
            .collect()
    }

    /// Number of stored subscriptions.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Load a store previously written with [`MemoryStore::save`].
    ///
    /// A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read subscription store {}", path.display()))?;
        let subscriptions: Vec<Subscription> = serde_json::from_str(&content)
            .with_context(|| format!("Subscription store {} is not valid JSON", path.display()))?;

        let records = subscriptions
            .into_iter()
            .map(|s| (s.id, VersionedRecord { subscription: s, version: 0 }))
            .collect();
        Ok(Self {
            records: Mutex::new(records),
        })
    }

    /// Persist all records as a JSON array of subscriptions.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let subscriptions = self.all().await;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&subscriptions)?)
            .with_context(|| format!("Failed to write subscription store {}", path.display()))?;
        Ok(())
    }

    /// Apply a mutation under a version check, retrying on conflict.
    ///
    /// Holding the map lock already linearizes updates; the version compare
    /// keeps the same read-compare-write discipline an external store would
    /// need, so the trait semantics don't silently depend on the in-memory
    /// lock.
    async fn update<F>(&self, id: Uuid, mut apply: F) -> Result<u32>
    where
        F: FnMut(&mut Subscription),
    {
        loop {
            let (snapshot_version, mut subscription) = {
                let records = self.records.lock().await;
                let record = records
                    .get(&id)
                    .with_context(|| format!("Unknown subscription {id}"))?;
                (record.version, record.subscription.clone())
            };

            apply(&mut subscription);

            let mut records = self.records.lock().await;
            let record = records
                .get_mut(&id)
                .with_context(|| format!("Unknown subscription {id}"))?;
            if record.version != snapshot_version {
                // Lost a race with a concurrent writer; re-read and re-apply.
                continue;
            }
            record.subscription = subscription;
            record.version += 1;
            return Ok(record.subscription.failure_count);
        }
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn list_active(&self) -> Result<Vec<Subscription>> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .filter(|r| r.subscription.active)
            .map(|r| r.subscription.clone())
            .collect())
    }

    async fn update_on_success(&self, id: Uuid) -> Result<()> {
        self.update(id, |s| {
            s.failure_count = 0;
            s.last_success = Some(Utc::now());
        })
        .await?;
        Ok(())
    }

    async fn increment_failure(&self, id: Uuid) -> Result<u32> {
        self.update(id, |s| {
            s.failure_count = s.failure_count.saturating_add(1);
        })
        .await
    }

    async fn deactivate(&self, id: Uuid) -> Result<()> {
        self.update(id, |s| {
            s.active = false;
        })
        .await?;
        Ok(())
    }
}
