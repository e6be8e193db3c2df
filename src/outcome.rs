//! Transport response classification and retry policy.
//!
//! The core owns the interpretation of push service responses, not the
//! transport: status codes map onto a [`DeliveryResult`] here, and the
//! retry/deactivation decisions derive from that classification plus the
//! [`RetryPolicy`] knobs.
//!
//! Per-attempt state machine:
//!
//! ```text
//! Pending --success-->   Success       (failure count reset, stamp time)
//! Pending --retryable--> RetryScheduled (backoff wait, then re-attempt)
//!                        └─ retry budget spent → Failed (active untouched)
//! Pending --permanent--> Deactivated   (active=false, no retry)
//! ```

use std::time::Duration;

use crate::transport::TransportResponse;

/// Classified outcome of one delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryResult {
    /// The push service accepted the message.
    Success,
    /// Transient failure; eligible for retry within this dispatch.
    RetryableFailure {
        /// Human-readable cause for logging.
        reason: String,
        /// Server-advised delay, honored over local backoff.
        retry_after: Option<Duration>,
    },
    /// The subscription is dead or the request was rejected outright.
    PermanentFailure {
        /// Human-readable cause for logging.
        reason: String,
    },
}

/// Final state of one subscription's attempt pipeline within a dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Delivered; `retried` marks whether any retry was needed.
    Succeeded {
        /// At least one retry preceded the success.
        retried: bool,
    },
    /// Permanent failure; the subscription was deactivated.
    Deactivated,
    /// Retry budget spent, store fault, or abandoned at the dispatch
    /// deadline. The subscription stays active for the next event.
    Failed {
        /// At least one retry preceded the failure.
        retried: bool,
    },
}

/// Map a push service response onto a delivery result.
///
/// - 2xx: success
/// - 404/410: the subscription is gone (browser unsubscribed or expired)
/// - 429/5xx: transient, retry with the server-advised delay if given
/// - any other status: rejected, treated as permanent
pub fn classify_response(response: &TransportResponse) -> DeliveryResult {
    match response.status {
        200..=299 => DeliveryResult::Success,
        404 | 410 => DeliveryResult::PermanentFailure {
            reason: format!("subscription expired (HTTP {})", response.status),
        },
        429 => DeliveryResult::RetryableFailure {
            reason: "rate limited (HTTP 429)".to_string(),
            retry_after: response.retry_after,
        },
        500..=599 => DeliveryResult::RetryableFailure {
            reason: format!("push service error (HTTP {})", response.status),
            retry_after: response.retry_after,
        },
        status => DeliveryResult::PermanentFailure {
            reason: format!("request rejected (HTTP {status})"),
        },
    }
}

/// Retry knobs for one dispatch.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Retries allowed per subscription within one dispatch.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_backoff: Duration,
    /// Cap on the exponential backoff.
    pub max_backoff: Duration,
    /// Bound on one transport send.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before the next retry.
    ///
    /// A server-advised delay wins over local backoff. Otherwise the delay
    /// is `base × 2^retries_done`, capped at `max_backoff`:
    /// first retry waits `base`, the second `2×base`, and so on.
    pub fn delay(&self, retries_done: u32, server_advised: Option<Duration>) -> Duration {
        if let Some(advised) = server_advised {
            return advised;
        }
        let exponent = retries_done.min(20);
        let multiplier = 1u64 << exponent;
        let delay_ms = (self.base_backoff.as_millis() as u64)
            .saturating_mul(multiplier)
            .min(self.max_backoff.as_millis() as u64);
        Duration::from_millis(delay_ms)
    }
}
