//! Authentication against Azure AD for the Dataverse Web API
//!
//! [`Authenticator::access_token`] resolves a usable bearer token via a
//! strict priority chain; each step is tried only if the previous one
//! yielded nothing usable:
//!
//! 1. Operator-supplied token of JWT shape: used immediately, the cache is
//!    never touched.
//! 2. Cached token that clears the 300 s expiry buffer.
//! 3. Silent reacquisition with the cached refresh token.
//! 4. Interactive device-code sign-in.
//!
//! Steps 3 and 4 write the resulting grant back to the cache.

pub mod cache;
pub mod device;

pub use cache::{CachedToken, TokenCache, TOKEN_EXPIRY_BUFFER_SECS};
pub use device::{DeviceCodeFlow, TokenGrant};

use crate::config::Config;
use crate::error::{Error, Result};

/// Structural check for operator-supplied tokens: three dot-separated,
/// non-empty segments.
pub fn has_jwt_shape(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 3 && parts.iter().all(|part| !part.is_empty())
}

/// Resolves access tokens for one organization/tenant pair.
pub struct Authenticator {
    tenant_id: String,
    client_id: String,
    organization_url: String,
    login_hint: String,
    operator_token: Option<String>,
    cache: TokenCache,
}

impl Authenticator {
    pub fn new(config: &Config) -> Self {
        Self {
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            organization_url: config.organization_url_trimmed().to_string(),
            login_hint: config.login_hint.clone(),
            operator_token: config
                .access_token
                .clone()
                .filter(|token| !token.is_empty()),
            cache: TokenCache::new(config.token_cache_path.clone()),
        }
    }

    /// Resolve a usable access token via the priority chain.
    pub async fn access_token(&self) -> Result<String> {
        // Priority 1: operator-supplied token, bypassing cache and
        // interactive flow entirely.
        if let Some(token) = &self.operator_token {
            if has_jwt_shape(token) {
                tracing::info!("Using operator-supplied access token");
                return Ok(token.clone());
            }
            tracing::warn!("Operator-supplied token is not JWT-shaped; ignoring it");
        }

        // Priority 2: cached token within its validity window.
        let cached = self.cache.load();
        if let Some(token) = &cached {
            if token.is_valid() {
                tracing::info!("Using cached access token");
                return Ok(token.access_token.clone());
            }
        }

        let flow = DeviceCodeFlow::new(&self.tenant_id, &self.client_id, &self.organization_url)?;

        // Priority 3: silent reacquisition via the cached refresh token.
        if let Some(refresh_token) = cached.and_then(|token| token.refresh_token) {
            match flow.redeem_refresh_token(&refresh_token).await {
                Ok(grant) => {
                    tracing::info!("Token acquired silently via refresh grant");
                    self.cache_grant(&grant);
                    return Ok(grant.access_token);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Silent reacquisition failed, falling back");
                }
            }
        }

        // Priority 4: interactive device-code sign-in.
        let grant = flow.acquire(&self.login_hint).await.map_err(|e| match e {
            Error::Authentication(description) => Error::Authentication(description),
            other => Error::Authentication(other.to_string()),
        })?;
        tracing::info!("Interactive authentication successful");
        self.cache_grant(&grant);
        Ok(grant.access_token)
    }

    fn cache_grant(&self, grant: &TokenGrant) {
        let expires_in = grant.expires_in.unwrap_or(cache::DEFAULT_TOKEN_EXPIRY_SECS);
        self.cache.save(&CachedToken {
            access_token: grant.access_token.clone(),
            expires_at: cache::unix_now() + expires_in,
            expires_in,
            refresh_token: grant.refresh_token.clone(),
        });
    }

    /// Clear the token cache.
    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("Token cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::cache::unix_now;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, operator_token: Option<&str>) -> Config {
        let mut config: Config = toml::from_str(
            r#"
organization_url = "https://contoso.crm.dynamics.com"
tenant_id = "8f08bcba-e79b-4aec-ba55-e46e7343c5f5"
workstream_id = "bf8ebd2e-9043-4deb-b11f-d2fa48afc455"
max_conversations = 10
"#,
        )
        .unwrap();
        config.token_cache_path = dir.path().join("token_cache.json");
        config.access_token = operator_token.map(str::to_string);
        config
    }

    #[test]
    fn test_jwt_shape() {
        assert!(has_jwt_shape("aaa.bbb.ccc"));
        assert!(!has_jwt_shape(""));
        assert!(!has_jwt_shape("aaa.bbb"));
        assert!(!has_jwt_shape("aaa..ccc"));
        assert!(!has_jwt_shape("aaa.bbb.ccc.ddd"));
    }

    #[tokio::test]
    async fn test_operator_token_wins_and_cache_is_untouched() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, Some("head.body.sig"));

        // Seed a perfectly valid cached token; it must not be used.
        let cache = TokenCache::new(config.token_cache_path.clone());
        cache.save(&CachedToken {
            access_token: "cached.token.value".to_string(),
            expires_at: unix_now() + 3600,
            expires_in: 3600,
            refresh_token: None,
        });
        let before = std::fs::read_to_string(cache.path()).unwrap();

        let authenticator = Authenticator::new(&config);
        let token = authenticator.access_token().await.unwrap();

        assert_eq!(token, "head.body.sig");
        let after = std::fs::read_to_string(cache.path()).unwrap();
        assert_eq!(before, after, "cache file must not change");
    }

    #[tokio::test]
    async fn test_valid_cached_token_used_when_no_operator_token() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, None);

        let cache = TokenCache::new(config.token_cache_path.clone());
        cache.save(&CachedToken {
            access_token: "cached.token.value".to_string(),
            expires_at: unix_now() + 3600,
            expires_in: 3600,
            refresh_token: None,
        });

        let authenticator = Authenticator::new(&config);
        let token = authenticator.access_token().await.unwrap();
        assert_eq!(token, "cached.token.value");
    }

    #[tokio::test]
    async fn test_malformed_operator_token_falls_through_to_cache() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, Some("not-a-jwt"));

        let cache = TokenCache::new(config.token_cache_path.clone());
        cache.save(&CachedToken {
            access_token: "cached.token.value".to_string(),
            expires_at: unix_now() + 3600,
            expires_in: 3600,
            refresh_token: None,
        });

        let authenticator = Authenticator::new(&config);
        let token = authenticator.access_token().await.unwrap();
        assert_eq!(token, "cached.token.value");
    }

    #[test]
    fn test_clear_cache() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, None);

        let cache = TokenCache::new(config.token_cache_path.clone());
        cache.save(&CachedToken {
            access_token: "cached.token.value".to_string(),
            expires_at: unix_now() + 3600,
            expires_in: 3600,
            refresh_token: None,
        });

        let authenticator = Authenticator::new(&config);
        authenticator.clear_cache();
        assert!(cache.load().is_none());
    }
}
