//! Normalized webhook message and intake validation.
//!
//! The webhook intake accepts a JSON body, validates it, and produces a
//! [`NormalizedMessage`]. The message is created once per webhook event and
//! shared read-only across all delivery attempts. Malformed bodies (missing
//! title or body) are rejected here and never reach the delivery engine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A notification action button shown by the browser.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    /// Action identifier reported back when the user clicks the button.
    pub action: String,
    /// Button label.
    pub title: String,
}

/// An immutable, validated notification payload.
///
/// Wire contract: `{title, body, icon?, badge?, data?, actions?}` where
/// `title` and `body` are required and non-empty. The serialized form of
/// this struct is what gets encrypted and delivered to the browser's
/// service worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Notification title (required).
    pub title: String,
    /// Notification body text (required).
    pub body: String,
    /// Icon URL shown next to the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Badge URL for the notification tray.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// Opaque structured data forwarded to the service worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Action buttons.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NotificationAction>,
}

impl NormalizedMessage {
    /// Create a message with just a title and body.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            icon: None,
            badge: None,
            data: None,
            actions: Vec::new(),
        }
    }

    /// Parse and validate a webhook body.
    ///
    /// Rejects bodies that are not JSON objects, are missing `title` or
    /// `body`, or carry an empty `title`/`body`. The `data` field, when
    /// present, must be a JSON object.
    pub fn from_json(raw: &str) -> Result<Self> {
        let message: Self =
            serde_json::from_str(raw).context("Webhook body is not a valid notification")?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.title.trim().is_empty(),
            "Notification title must not be empty"
        );
        anyhow::ensure!(
            !self.body.trim().is_empty(),
            "Notification body must not be empty"
        );
        if let Some(data) = &self.data {
            anyhow::ensure!(data.is_object(), "Notification data must be a JSON object");
        }
        Ok(())
    }

    /// Serialize to the bytes that get encrypted for delivery.
    pub fn to_payload_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize notification payload")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_minimal() {
        let message = NormalizedMessage::from_json(r#"{"title":"Hi","body":"Hello"}"#)
            .expect("minimal body should parse");
        assert_eq!(message.title, "Hi");
        assert_eq!(message.body, "Hello");
        assert!(message.icon.is_none());
        assert!(message.actions.is_empty());
    }

    #[test]
    fn test_from_json_full() {
        let raw = r#"{
            "title": "Deploy finished",
            "body": "build 123 is live",
            "icon": "https://example.com/icon.png",
            "badge": "https://example.com/badge.png",
            "data": {"build": 123},
            "actions": [{"action": "view", "title": "View"}]
        }"#;
        let message = NormalizedMessage::from_json(raw).expect("full body should parse");
        assert_eq!(message.icon.as_deref(), Some("https://example.com/icon.png"));
        assert_eq!(message.actions.len(), 1);
        assert_eq!(message.actions[0].action, "view");
    }

    #[test]
    fn test_from_json_rejects_missing_title() {
        assert!(NormalizedMessage::from_json(r#"{"body":"Hello"}"#).is_err());
    }

    #[test]
    fn test_from_json_rejects_missing_body() {
        assert!(NormalizedMessage::from_json(r#"{"title":"Hi"}"#).is_err());
    }

    #[test]
    fn test_from_json_rejects_empty_title() {
        assert!(NormalizedMessage::from_json(r#"{"title":"  ","body":"Hello"}"#).is_err());
    }

    #[test]
    fn test_from_json_rejects_non_object_data() {
        assert!(
            NormalizedMessage::from_json(r#"{"title":"Hi","body":"Hello","data":[1,2]}"#).is_err()
        );
    }

    #[test]
    fn test_payload_bytes_roundtrip() {
        let message = NormalizedMessage::new("Hi", "Hello");
        let bytes = message.to_payload_bytes().expect("serialize");
        let parsed: NormalizedMessage =
            serde_json::from_slice(&bytes).expect("payload bytes are valid JSON");
        assert_eq!(parsed.title, "Hi");
        assert_eq!(parsed.body, "Hello");
    }

    #[test]
    fn test_payload_bytes_omit_empty_optionals() {
        let message = NormalizedMessage::new("Hi", "Hello");
        let json = String::from_utf8(message.to_payload_bytes().expect("serialize"))
            .expect("utf8");
        assert!(!json.contains("icon"));
        assert!(!json.contains("actions"));
    }
}
