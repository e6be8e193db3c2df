//! VAPID signing keypair management (RFC 8292).
//!
//! The relay authenticates to push services with a P-256 ECDSA keypair.
//! The public key is handed to browsers as the `applicationServerKey` at
//! subscription time; the private key signs the per-send authorization
//! token. An invalid keypair at startup is a fatal configuration error,
//! distinct from any per-subscription delivery error.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// VAPID keypair for web push authentication.
///
/// The private key is stored as the raw 32-byte P-256 scalar (base64url),
/// the format `VapidSignatureBuilder::from_base64()` expects. The public
/// key is the uncompressed SEC1 point (65 bytes, base64url).
#[derive(Debug, Serialize, Deserialize)]
pub struct VapidKeys {
    /// Raw 32-byte P-256 private key scalar (base64url).
    private_key_b64: String,
    /// Uncompressed public key bytes (base64url, 65 bytes decoded).
    public_key_b64: String,
}

impl VapidKeys {
    /// Generate a fresh VAPID keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        // SEC1 uncompressed public key (65 bytes: 0x04 || x || y)
        let public_bytes = verifying_key.to_encoded_point(false);

        Self {
            private_key_b64: BASE64URL.encode(signing_key.to_bytes().as_slice()),
            public_key_b64: BASE64URL.encode(public_bytes.as_bytes()),
        }
    }

    /// Base64url-encoded uncompressed public key (65 bytes decoded).
    ///
    /// This is sent to browsers as the VAPID `applicationServerKey`.
    pub fn public_key_base64url(&self) -> &str {
        &self.public_key_b64
    }

    /// Base64url-encoded raw 32-byte private key scalar.
    pub fn private_key_base64url(&self) -> &str {
        &self.private_key_b64
    }

    /// Reconstruct and validate a keypair from base64url-encoded strings.
    ///
    /// Validates the public key shape (65-byte uncompressed point) and that
    /// the private key is a valid 32-byte P-256 scalar.
    pub fn from_base64url(public_key_b64: &str, private_key_b64: &str) -> Result<Self> {
        let pub_bytes = BASE64URL
            .decode(public_key_b64)
            .context("Invalid base64url for VAPID public key")?;
        anyhow::ensure!(
            pub_bytes.len() == 65 && pub_bytes[0] == 0x04,
            "VAPID public key must be 65-byte uncompressed P-256 point"
        );

        let priv_bytes = BASE64URL
            .decode(private_key_b64)
            .context("Invalid base64url for VAPID private key")?;
        anyhow::ensure!(
            priv_bytes.len() == 32,
            "VAPID private key must be 32-byte P-256 scalar, got {} bytes",
            priv_bytes.len()
        );
        SigningKey::from_bytes(priv_bytes.as_slice().into())
            .context("VAPID private key is not a valid P-256 scalar")?;

        Ok(Self {
            private_key_b64: private_key_b64.to_string(),
            public_key_b64: public_key_b64.to_string(),
        })
    }

    /// Load the keypair from a JSON file, generating and persisting a fresh
    /// one if the file does not exist.
    ///
    /// An existing file with an invalid keypair is an error, never silently
    /// regenerated: subscriptions registered against the old public key
    /// would become undeliverable.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read VAPID key file {}", path.display()))?;
            let stored: Self = serde_json::from_str(&content)
                .with_context(|| format!("VAPID key file {} is not valid JSON", path.display()))?;
            // Revalidate on every load so a corrupt key fails startup, not a send.
            return Self::from_base64url(&stored.public_key_b64, &stored.private_key_b64)
                .with_context(|| format!("VAPID key file {} holds an invalid keypair", path.display()));
        }

        let keys = Self::generate();
        keys.save(path)?;
        log::info!("[Push] Generated new VAPID keypair at {}", path.display());
        Ok(keys)
    }

    /// Persist the keypair with owner-only permissions.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;

        // Private key material: owner read/write only
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Uncompressed public key bytes (65 bytes).
    pub fn public_key_bytes(&self) -> Result<Vec<u8>> {
        BASE64URL
            .decode(&self.public_key_b64)
            .context("Failed to decode VAPID public key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_vapid_keys() {
        let keys = VapidKeys::generate();

        // Public key should be 65 bytes (uncompressed P-256 point)
        let pub_bytes = keys.public_key_bytes().expect("decode public key");
        assert_eq!(pub_bytes.len(), 65, "uncompressed P-256 public key is 65 bytes");
        assert_eq!(pub_bytes[0], 0x04, "uncompressed point starts with 0x04");

        // Private key should be raw 32-byte scalar
        let priv_bytes = BASE64URL
            .decode(keys.private_key_base64url())
            .expect("decode private key");
        assert_eq!(priv_bytes.len(), 32, "raw P-256 scalar is 32 bytes");
    }

    #[test]
    fn test_from_base64url_roundtrip() {
        let keys = VapidKeys::generate();
        let reconstructed = VapidKeys::from_base64url(
            keys.public_key_base64url(),
            keys.private_key_base64url(),
        )
        .expect("should reconstruct from base64url");

        assert_eq!(
            keys.public_key_base64url(),
            reconstructed.public_key_base64url()
        );
        assert_eq!(
            keys.private_key_base64url(),
            reconstructed.private_key_base64url(),
        );
    }

    #[test]
    fn test_from_base64url_rejects_invalid() {
        assert!(VapidKeys::from_base64url("not-valid-key", "also-bad").is_err());
    }

    #[test]
    fn test_from_base64url_rejects_wrong_length_scalar() {
        let keys = VapidKeys::generate();
        let short = BASE64URL.encode([0u8; 16]);
        assert!(VapidKeys::from_base64url(keys.public_key_base64url(), &short).is_err());
    }

    #[test]
    fn test_vapid_key_works_with_web_push_from_base64() {
        // Verify our key format is accepted by web-push crate's from_base64
        use web_push::{SubscriptionInfo, VapidSignatureBuilder};

        let keys = VapidKeys::generate();
        let sub = SubscriptionInfo::new(
            "https://push.example.com/test",
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "AAAAAAAAAAAAAAAAAAAAAA",
        );
        let builder = VapidSignatureBuilder::from_base64(keys.private_key_base64url(), &sub);
        assert!(builder.is_ok(), "from_base64 should accept our raw key scalar");
    }

    #[test]
    fn test_load_or_generate_persists_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vapid.json");

        let keys = VapidKeys::load_or_generate(&path).expect("generate");
        assert!(path.exists());

        let reloaded = VapidKeys::load_or_generate(&path).expect("reload");
        assert_eq!(
            keys.public_key_base64url(),
            reloaded.public_key_base64url(),
            "reload must return the same keypair, not regenerate"
        );
    }

    #[test]
    fn test_load_rejects_corrupt_key_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vapid.json");
        std::fs::write(
            &path,
            r#"{"private_key_b64":"bad","public_key_b64":"bad"}"#,
        )
        .expect("write");

        assert!(VapidKeys::load_or_generate(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vapid.json");
        VapidKeys::generate().save(&path).expect("save");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
