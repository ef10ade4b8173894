//! Account connection strings
//!
//! `AccountEndpoint=https://account.documents.azure.com:443/;AccountKey=base64==;`
//!
//! Segment names are matched without regard to case. Unknown segments are
//! kept but ignored.

use docbackup_core::{BackupError, Result};
use secrecy::SecretString;
use std::collections::HashMap;
use std::fmt;
use url::Url;

const ACCOUNT_ENDPOINT: &str = "accountendpoint";
const ACCOUNT_KEY: &str = "accountkey";

/// Parsed account connection string
#[derive(Clone)]
pub struct ConnectionString {
    endpoint: Url,
    account_key: SecretString,
}

impl ConnectionString {
    /// Parse `Name=value;Name=value;` pairs
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments: HashMap<String, String> = HashMap::new();

        for segment in raw.split(';').filter(|s| !s.trim().is_empty()) {
            let (name, value) = match segment.find('=') {
                Some(pos) if pos > 0 => (&segment[..pos], &segment[pos + 1..]),
                _ => {
                    return Err(BackupError::config(format!(
                        "unexpected connection string segment: {}",
                        segment
                    )))
                }
            };

            let name = name.trim().to_ascii_lowercase();
            if segments.contains_key(&name) {
                return Err(BackupError::config(format!(
                    "duplicate connection string segment: {}",
                    name
                )));
            }
            segments.insert(name, value.trim().to_string());
        }

        let endpoint = segments.remove(ACCOUNT_ENDPOINT).ok_or_else(|| {
            BackupError::config("missing connection string segment: AccountEndpoint")
        })?;
        let account_key = segments
            .remove(ACCOUNT_KEY)
            .ok_or_else(|| BackupError::config("missing connection string segment: AccountKey"))?;

        let endpoint = Url::parse(&endpoint).map_err(|e| {
            BackupError::config(format!("invalid AccountEndpoint '{}': {}", endpoint, e))
        })?;
        if endpoint.scheme() != "https" && endpoint.scheme() != "http" {
            return Err(BackupError::config(format!(
                "AccountEndpoint must be http(s), got: {}",
                endpoint
            )));
        }

        Ok(Self {
            endpoint,
            account_key: SecretString::from(account_key),
        })
    }

    /// Account endpoint URL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Account master key (base64)
    pub fn account_key(&self) -> &SecretString {
        &self.account_key
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint.as_str())
            .field("account_key", &"[REDACTED]")
            .finish()
    }
}
