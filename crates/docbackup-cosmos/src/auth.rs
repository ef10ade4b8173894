//! Master-key request signing
//!
//! Every request carries an `authorization` header derived from the verb, the
//! resource type, the resource link and the `x-ms-date` value, signed with
//! HMAC-SHA256 under the decoded account key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use docbackup_core::{BackupError, Result};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretBox, SecretString};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Decoded account master key
pub struct MasterKey {
    key: SecretBox<Vec<u8>>,
}

impl MasterKey {
    /// Decode a base64 account key
    pub fn from_base64(encoded: &SecretString) -> Result<Self> {
        let key = BASE64
            .decode(encoded.expose_secret().trim())
            .map_err(|e| BackupError::Auth(format!("account key is not valid base64: {}", e)))?;
        if key.is_empty() {
            return Err(BackupError::Auth("account key must not be empty".to_string()));
        }
        Ok(Self {
            key: SecretBox::new(Box::new(key)),
        })
    }

    /// Build the URL-encoded `authorization` header value
    pub fn authorization(
        &self,
        verb: &str,
        resource_type: &str,
        resource_link: &str,
        date: &str,
    ) -> Result<String> {
        let payload = format!(
            "{}\n{}\n{}\n{}\n\n",
            verb.to_lowercase(),
            resource_type.to_lowercase(),
            resource_link,
            date.to_lowercase()
        );

        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret())
            .map_err(|e| BackupError::Auth(format!("invalid account key: {}", e)))?;
        mac.update(payload.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let token = format!("type=master&ver=1.0&sig={}", signature);
        Ok(url::form_urlencoded::byte_serialize(token.as_bytes()).collect())
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey").field("key", &"[REDACTED]").finish()
    }
}

/// Format a timestamp the way `x-ms-date` expects (RFC 1123, GMT)
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
