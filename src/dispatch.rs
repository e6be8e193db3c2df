//! Bounded-concurrency fan-out delivery engine.
//!
//! One dispatch call fans a message out to every active subscription,
//! running each subscription's attempt-plus-retries pipeline as an
//! independent task. A semaphore bounds how many sends are in flight at
//! once; a pipeline holds a permit only for the duration of one send, so
//! backoff waits never occupy a fan-out slot.
//!
//! Isolation: one subscription's failure, retry, or deactivation never
//! blocks or aborts the others. The only dispatch-wide failure is the
//! initial `list_active` call — if the store cannot enumerate targets,
//! nothing was delivered and the caller gets a service-level error.

// Rust guideline compliant 2026-02

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::message::NormalizedMessage;
use crate::outcome::{classify_response, DeliveryResult, PipelineOutcome, RetryPolicy};
use crate::payload::PayloadEncryptor;
use crate::store::SubscriptionStore;
use crate::subscription::Subscription;
use crate::transport::PushTransport;

/// Aggregate counts for one dispatch call. Immutable once returned.
///
/// `retried` counts subscriptions whose pipeline performed at least one
/// retry, whatever the final state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Subscriptions the message was delivered to.
    pub succeeded: usize,
    /// Subscriptions that needed at least one retry.
    pub retried: usize,
    /// Subscriptions deactivated by a permanent failure.
    pub deactivated: usize,
    /// Subscriptions that exhausted their retry budget, hit a store
    /// fault, or were abandoned at the dispatch deadline.
    pub failed: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: PipelineOutcome) {
        let retried = match outcome {
            PipelineOutcome::Succeeded { retried } => {
                self.succeeded += 1;
                retried
            }
            PipelineOutcome::Deactivated => {
                self.deactivated += 1;
                false
            }
            PipelineOutcome::Failed { retried } => {
                self.failed += 1;
                retried
            }
        };
        if retried {
            self.retried += 1;
        }
    }
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "succeeded={} retried={} deactivated={} failed={}",
            self.succeeded, self.retried, self.deactivated, self.failed
        )
    }
}

/// Orchestrates fan-out delivery of one message to all active subscriptions.
///
/// The store, transport, and encryptor are shared across dispatches; the
/// engine itself holds no per-dispatch state and tolerates concurrent
/// `dispatch` calls (per-subscription updates are linearized by the store).
pub struct DeliveryEngine {
    store: Arc<dyn SubscriptionStore>,
    transport: Arc<dyn PushTransport>,
    encryptor: Arc<PayloadEncryptor>,
    max_concurrency: usize,
    dispatch_timeout: Duration,
    policy: RetryPolicy,
}

impl fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("max_concurrency", &self.max_concurrency)
            .field("dispatch_timeout", &self.dispatch_timeout)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DeliveryEngine {
    /// Build an engine from its collaborators and the configured limits.
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn PushTransport>,
        encryptor: PayloadEncryptor,
        config: &Config,
    ) -> Self {
        Self {
            store,
            transport,
            encryptor: Arc::new(encryptor),
            max_concurrency: config.max_concurrency,
            dispatch_timeout: config.dispatch_timeout(),
            policy: config.retry_policy(),
        }
    }

    /// Fan the message out to every active subscription.
    ///
    /// Returns after all pipelines have resolved or the dispatch-wide
    /// timeout elapses; attempts still pending at the deadline are
    /// abandoned and counted as failed (never deactivated — their outcome
    /// is unknown). Errs only if the store cannot list active
    /// subscriptions, in which case nothing was sent.
    pub async fn dispatch(&self, message: NormalizedMessage) -> Result<DispatchReport> {
        let subscriptions = self
            .store
            .list_active()
            .await
            .context("Failed to list active subscriptions")?;

        if subscriptions.is_empty() {
            log::debug!("[Push] No active subscriptions; nothing to dispatch");
            return Ok(DispatchReport::default());
        }

        log::info!(
            "[Push] Dispatching \"{}\" to {} subscription(s)",
            message.title,
            subscriptions.len()
        );

        let message = Arc::new(message);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut pipelines = JoinSet::new();

        for subscription in subscriptions {
            pipelines.spawn(deliver_one(
                subscription,
                Arc::clone(&message),
                Arc::clone(&self.encryptor),
                Arc::clone(&self.transport),
                Arc::clone(&self.store),
                Arc::clone(&semaphore),
                self.policy,
            ));
        }

        let mut report = DispatchReport::default();
        let deadline = tokio::time::timeout(self.dispatch_timeout, async {
            while let Some(joined) = pipelines.join_next().await {
                match joined {
                    Ok(outcome) => report.record(outcome),
                    Err(e) => {
                        log::error!("[Push] Delivery pipeline panicked: {e}");
                        report.failed += 1;
                    }
                }
            }
        })
        .await;

        if deadline.is_err() {
            let abandoned = pipelines.len();
            pipelines.abort_all();
            // Outcome unknown for abandoned attempts: Failed, never
            // Deactivated.
            report.failed += abandoned;
            log::warn!(
                "[Push] Dispatch timed out after {:?}; abandoned {} pending attempt(s)",
                self.dispatch_timeout,
                abandoned
            );
        }

        log::info!("[Push] Dispatch complete: {report}");
        Ok(report)
    }
}

/// One subscription's attempt-plus-retries pipeline.
///
/// Runs independently of every other subscription. The semaphore permit is
/// held only across the send; the backoff sleep happens with the permit
/// released so slow retries cannot starve other subscriptions.
async fn deliver_one(
    subscription: Subscription,
    message: Arc<NormalizedMessage>,
    encryptor: Arc<PayloadEncryptor>,
    transport: Arc<dyn PushTransport>,
    store: Arc<dyn SubscriptionStore>,
    semaphore: Arc<Semaphore>,
    policy: RetryPolicy,
) -> PipelineOutcome {
    let mut retries_done = 0u32;

    loop {
        // Fresh envelope per attempt: new ephemeral key and token.
        let request = match encryptor.build(&message, &subscription) {
            Ok(request) => request,
            Err(e) => {
                log::warn!(
                    "[Push] Unusable key material for {} ({e:#}); deactivating",
                    subscription.endpoint
                );
                return deactivate(&store, &subscription, retries_done).await;
            }
        };

        let result = {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return PipelineOutcome::Failed { retried: retries_done > 0 },
            };
            match tokio::time::timeout(policy.attempt_timeout, transport.send(&request)).await {
                Ok(Ok(response)) => classify_response(&response),
                Ok(Err(e)) => DeliveryResult::RetryableFailure {
                    reason: format!("{e:#}"),
                    retry_after: None,
                },
                Err(_) => DeliveryResult::RetryableFailure {
                    reason: format!("send timed out after {:?}", policy.attempt_timeout),
                    retry_after: None,
                },
            }
        };

        match result {
            DeliveryResult::Success => {
                if let Err(e) = store.update_on_success(subscription.id).await {
                    log::error!(
                        "[Push] Store update failed for {}: {e:#}",
                        subscription.endpoint
                    );
                    return PipelineOutcome::Failed { retried: retries_done > 0 };
                }
                log::info!("[Push] Delivered to {}", subscription.endpoint);
                return PipelineOutcome::Succeeded { retried: retries_done > 0 };
            }
            DeliveryResult::PermanentFailure { reason } => {
                log::info!("[Push] {}: {reason}; deactivating", subscription.endpoint);
                return deactivate(&store, &subscription, retries_done).await;
            }
            DeliveryResult::RetryableFailure { reason, retry_after } => {
                match store.increment_failure(subscription.id).await {
                    Ok(count) => log::warn!(
                        "[Push] {}: {reason} (failure #{count})",
                        subscription.endpoint
                    ),
                    Err(e) => {
                        log::error!(
                            "[Push] Store update failed for {}: {e:#}",
                            subscription.endpoint
                        );
                        return PipelineOutcome::Failed { retried: retries_done > 0 };
                    }
                }

                if retries_done >= policy.max_retries {
                    log::warn!(
                        "[Push] {}: retry budget spent; leaving active for the next event",
                        subscription.endpoint
                    );
                    return PipelineOutcome::Failed { retried: retries_done > 0 };
                }

                let delay = policy.delay(retries_done, retry_after);
                retries_done += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Deactivate after a permanent failure; a store fault downgrades the
/// outcome to Failed so the record is retried on the next event.
async fn deactivate(
    store: &Arc<dyn SubscriptionStore>,
    subscription: &Subscription,
    retries_done: u32,
) -> PipelineOutcome {
    match store.deactivate(subscription.id).await {
        Ok(()) => PipelineOutcome::Deactivated,
        Err(e) => {
            log::error!(
                "[Push] Failed to deactivate {}: {e:#}",
                subscription.endpoint
            );
            PipelineOutcome::Failed { retried: retries_done > 0 }
        }
    }
}
