//! File-based token cache
//!
//! Persists a single bearer token with expiry metadata at a configured path.
//! A missing or corrupt cache file is a cache-miss, never a fatal error, and
//! a failed save is logged and swallowed so authentication can proceed
//! without caching.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tokens expiring within this buffer are treated as already expired.
pub const TOKEN_EXPIRY_BUFFER_SECS: u64 = 300;

/// Assumed token lifetime when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_EXPIRY_SECS: u64 = 3600;

/// A cached bearer token with expiry metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    /// Unix seconds at which the token expires
    pub expires_at: u64,
    /// Original lifetime in seconds, as reported by the token endpoint
    pub expires_in: u64,
    /// Refresh token for silent reacquisition, when the grant provided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl CachedToken {
    /// True while `now < expires_at - buffer`.
    pub fn is_valid_at(&self, now: u64) -> bool {
        now < self.expires_at.saturating_sub(TOKEN_EXPIRY_BUFFER_SECS)
    }

    /// True if the token is usable right now, respecting the expiry buffer.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(unix_now())
    }
}

/// Current time as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Durable single-token persistence at a configured file path.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached token.
    ///
    /// Returns `None` on missing file, malformed JSON, or a record without
    /// an access token.
    pub fn load(&self) -> Option<CachedToken> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let token: CachedToken = serde_json::from_str(&content).ok()?;
        if token.access_token.is_empty() {
            return None;
        }
        Some(token)
    }

    /// Save a token, overwriting any previous cache.
    ///
    /// Failure to write is logged as a warning and does not abort the
    /// caller.
    pub fn save(&self, token: &CachedToken) {
        if let Err(e) = self.write_atomic(token) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "could not save token cache"
            );
        }
    }

    // Whole-file rewrite via a temp sibling so readers never see a torn
    // write.
    fn write_atomic(&self, token: &CachedToken) -> Result<()> {
        let content = serde_json::to_string_pretty(token)?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Best-effort cache file removal; a missing file is not an error.
    pub fn clear(&self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "could not remove token cache"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir) -> TokenCache {
        TokenCache::new(dir.path().join("token_cache.json"))
    }

    fn token(expires_at: u64) -> CachedToken {
        CachedToken {
            access_token: "header.payload.signature".to_string(),
            expires_at,
            expires_in: 3600,
            refresh_token: None,
        }
    }

    #[test]
    fn test_validity_respects_expiry_buffer() {
        let now = unix_now();
        assert!(token(now + 400).is_valid_at(now));
        // Inside the 300s buffer: unexpired but unusable
        assert!(!token(now + 100).is_valid_at(now));
        assert!(!token(now).is_valid_at(now));
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let saved = token(unix_now() + 3600);
        cache.save(&saved);

        let loaded = cache.load().expect("token should load");
        assert_eq!(loaded.access_token, saved.access_token);
        assert_eq!(loaded.expires_at, saved.expires_at);
        assert!(loaded.is_valid());
    }

    #[test]
    fn test_missing_file_is_cache_miss() {
        let dir = TempDir::new().unwrap();
        assert!(cache_in(&dir).load().is_none());
    }

    #[test]
    fn test_corrupt_cache_is_cache_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        std::fs::write(cache.path(), "{not json").unwrap();
        assert!(cache.load().is_none());

        // Valid JSON but no access token
        std::fs::write(cache.path(), r#"{"expires_at": 1}"#).unwrap();
        assert!(cache.load().is_none());

        std::fs::write(
            cache.path(),
            r#"{"access_token": "", "expires_at": 1, "expires_in": 1}"#,
        )
        .unwrap();
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        cache.clear(); // no file yet

        cache.save(&token(unix_now() + 3600));
        assert!(cache.load().is_some());
        cache.clear();
        assert!(cache.load().is_none());
        cache.clear();
    }

    #[test]
    fn test_refresh_token_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let mut saved = token(unix_now() + 3600);
        saved.refresh_token = Some("refresh-me".to_string());
        cache.save(&saved);

        let loaded = cache.load().unwrap();
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-me"));
    }
}
