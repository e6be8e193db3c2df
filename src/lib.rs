//! Pushrelay - webhook-to-browser push relay.
//!
//! Relays inbound event notifications to browser-registered push endpoints
//! as encrypted Web Push messages (RFC 8030) with VAPID authentication
//! (RFC 8292) and aes128gcm payload encryption (RFC 8291).
//!
//! # Architecture
//!
//! ```text
//! Webhook event (validated JSON)
//!     ↓
//! DeliveryEngine::dispatch — bounded-concurrency fan-out
//!     ↓ per active subscription
//! PayloadEncryptor::build — fresh encrypted envelope + VAPID token
//!     ↓
//! PushTransport::send — HTTP POST to the browser's push service
//!     ↓
//! Outcome classification — retry / deactivate / record success
//!     ↓
//! SubscriptionStore update, aggregate DispatchReport returned to caller
//! ```
//!
//! One subscription's failure, retry, or deactivation never blocks or aborts
//! the others. The store and transport are trait seams so the engine can be
//! exercised against fakes in tests.
//!
//! # Modules
//!
//! - [`config`] - Configuration loading/saving with env overrides
//! - [`dispatch`] - Fan-out delivery engine and dispatch report
//! - [`message`] - Normalized webhook message and intake validation
//! - [`outcome`] - Transport response classification and retry policy
//! - [`payload`] - Per-subscription encrypted envelope construction
//! - [`store`] - Subscription store trait and in-memory implementation
//! - [`subscription`] - Subscription record and browser wire form
//! - [`transport`] - Push transport trait and reqwest implementation
//! - [`vapid`] - VAPID signing keypair management

// Library modules
pub mod config;
pub mod dispatch;
pub mod message;
pub mod outcome;
pub mod payload;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod vapid;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{DeliveryEngine, DispatchReport};
pub use message::NormalizedMessage;
pub use outcome::{DeliveryResult, RetryPolicy};
pub use payload::PayloadEncryptor;
pub use store::{MemoryStore, SubscriptionStore};
pub use subscription::Subscription;
pub use transport::{HttpTransport, PushRequest, PushTransport, TransportResponse};
pub use vapid::VapidKeys;
