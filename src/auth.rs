//! Session key issuance
//!
//! One short-lived key is fetched per session from an external issuance
//! endpoint and reused for both the transcription and synthesis channels.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

/// Response from the key issuance endpoint
#[derive(Deserialize)]
struct KeyResponse {
    #[serde(default)]
    key: String,
    #[serde(default)]
    error: Option<String>,
}

/// A short-lived credential for the speech services
#[derive(Clone)]
pub struct SessionKey(SecretString);

impl SessionKey {
    /// Wrap an already-issued key, trimming incidental whitespace
    ///
    /// # Errors
    ///
    /// Returns error if the key is empty after trimming.
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::Auth("issued session key is empty".to_string()));
        }
        Ok(Self(SecretString::from(trimmed)))
    }

    /// Expose the key for use in a transport credential field
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(***)")
    }
}

/// Fetch a session key from the issuance endpoint
///
/// # Errors
///
/// Returns [`Error::Auth`] if the request fails, the endpoint reports an
/// error, or the returned key is empty. Fatal to session start; not retried.
pub async fn fetch_session_key(client: &reqwest::Client, endpoint: &str) -> Result<SessionKey> {
    tracing::debug!(endpoint, "fetching session key");

    let response = client
        .post(endpoint)
        .send()
        .await
        .map_err(|e| Error::Auth(format!("key fetch failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Auth(format!("key endpoint error {status}: {body}")));
    }

    let result: KeyResponse = response
        .json()
        .await
        .map_err(|e| Error::Auth(format!("malformed key response: {e}")))?;

    if let Some(message) = result.error {
        return Err(Error::Auth(message));
    }

    let key = SessionKey::new(&result.key)?;
    tracing::info!("session key issued");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_whitespace_trimmed() {
        let key = SessionKey::new("  abc123\n").unwrap();
        assert_eq!(key.expose(), "abc123");
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(SessionKey::new("").is_err());
        assert!(SessionKey::new("   \n\t").is_err());
    }

    #[test]
    fn test_debug_does_not_leak() {
        let key = SessionKey::new("supersecret").unwrap();
        let printed = format!("{key:?}");
        assert!(!printed.contains("supersecret"));
    }
}
