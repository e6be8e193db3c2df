//! Encrypted push envelope construction.
//!
//! Builds the per-subscription encrypted message (RFC 8291 aes128gcm via
//! the `web-push` crate) and the signed VAPID authorization token
//! (RFC 8292) scoped to the endpoint's origin. Every attempt gets a fresh
//! envelope: key agreement runs against the subscription's P-256 public key
//! with a newly generated ephemeral keypair, so ciphertext is never reused
//! across attempts.
//!
//! Malformed subscription key material fails here, before any network
//! call; the engine treats every build failure as a permanent failure for
//! that subscription.

use std::time::Duration;

use anyhow::{Context, Result};
use web_push::{ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushMessageBuilder};

use crate::message::NormalizedMessage;
use crate::subscription::Subscription;
use crate::transport::PushRequest;
use crate::vapid::VapidKeys;

/// How long the push service may hold an undelivered message.
const MESSAGE_TTL_SECS: u32 = 86_400;

/// Builds encrypted envelopes and authorization headers per subscription.
///
/// Holds the application signing key and VAPID claim settings; one
/// instance is shared across all attempts of all dispatches. The signing
/// key is validated when the [`VapidKeys`] are loaded at startup, so a
/// build failure here always points at the subscription, not the
/// application key.
#[derive(Clone, Debug)]
pub struct PayloadEncryptor {
    vapid_private_b64: String,
    contact: String,
    token_ttl: Duration,
}

impl PayloadEncryptor {
    /// Create an encryptor from the validated application keypair.
    ///
    /// `contact` becomes the VAPID `sub` claim (a mailto: or https URL the
    /// push service can use to reach the operator). `token_ttl` bounds the
    /// lifetime of each signed authorization token.
    pub fn new(keys: &VapidKeys, contact: impl Into<String>, token_ttl: Duration) -> Self {
        Self {
            vapid_private_b64: keys.private_key_base64url().to_string(),
            contact: contact.into(),
            token_ttl,
        }
    }

    /// Build one encrypted, authorized push request.
    ///
    /// Failures indicate unusable subscription key material (or an
    /// endpoint URL the signer cannot derive an origin from) and are
    /// classified as permanent by the caller. No network I/O happens here.
    pub fn build(
        &self,
        message: &NormalizedMessage,
        subscription: &Subscription,
    ) -> Result<PushRequest> {
        let payload = message.to_payload_bytes()?;

        let sub_info = SubscriptionInfo::new(
            &subscription.endpoint,
            &subscription.keys.p256dh,
            &subscription.keys.auth,
        );

        let mut sig_builder =
            VapidSignatureBuilder::from_base64(&self.vapid_private_b64, &sub_info)
                .context("Failed to build VAPID signature for endpoint")?;
        sig_builder.add_claim("sub", self.contact.as_str());
        sig_builder.add_claim(
            "exp",
            chrono::Utc::now().timestamp() + self.token_ttl.as_secs() as i64,
        );
        let signature = sig_builder.build().context("Failed to sign VAPID token")?;

        let mut builder = WebPushMessageBuilder::new(&sub_info);
        builder.set_payload(ContentEncoding::Aes128Gcm, &payload);
        builder.set_vapid_signature(signature);
        builder.set_ttl(MESSAGE_TTL_SECS);

        let message = builder
            .build()
            .context("Failed to encrypt push payload for subscription")?;

        let mut headers = vec![("TTL".to_string(), message.ttl.to_string())];

        match message.urgency {
            Some(urgency) => headers.push(("Urgency".to_string(), urgency.to_string())),
            None => headers.push(("Urgency".to_string(), "normal".to_string())),
        }

        if let Some(topic) = message.topic {
            headers.push(("Topic".to_string(), topic));
        }

        let push_payload = message
            .payload
            .context("Encrypted message is missing its payload")?;

        headers.push((
            "Content-Encoding".to_string(),
            push_payload.content_encoding.to_str().to_string(),
        ));
        headers.push((
            "Content-Type".to_string(),
            "application/octet-stream".to_string(),
        ));
        for (name, value) in &push_payload.crypto_headers {
            headers.push(((*name).to_string(), value.clone()));
        }

        Ok(PushRequest {
            endpoint: message.endpoint.to_string(),
            headers,
            body: push_payload.content,
        })
    }
}
