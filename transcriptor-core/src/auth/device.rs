//! OAuth2 device-code flow against Azure AD
//!
//! Public-client flow for a terminal program: request a user code, tell the
//! operator where to enter it, then poll the token endpoint until the grant
//! completes or the code expires. The same endpoint also redeems refresh
//! tokens for silent reacquisition.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// A successful token grant from the authority.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
}

/// Response from POST /oauth2/v2.0/devicecode
#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    /// Seconds the code stays redeemable
    expires_in: u64,
    /// Polling interval requested by the authority
    #[serde(default = "default_poll_interval")]
    interval: u64,
    #[serde(default)]
    message: Option<String>,
}

fn default_poll_interval() -> u64 {
    5
}

/// Response from POST /oauth2/v2.0/token (success or pending error)
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Device-code flow client bound to one tenant, client id, and scope.
pub struct DeviceCodeFlow {
    http: reqwest::Client,
    authority: String,
    client_id: String,
    scope: String,
}

impl DeviceCodeFlow {
    /// Create a flow for `https://login.microsoftonline.com/{tenant_id}`
    /// with scope `{organization_url}/.default`.
    pub fn new(tenant_id: &str, client_id: &str, organization_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            authority: format!("https://login.microsoftonline.com/{}", tenant_id),
            client_id: client_id.to_string(),
            scope: format!("{}/.default", organization_url.trim_end_matches('/')),
        })
    }

    /// Run the interactive flow to completion.
    ///
    /// Prints the verification URI and user code, then polls until the
    /// operator finishes signing in or the code expires.
    pub async fn acquire(&self, login_hint: &str) -> Result<TokenGrant> {
        let device = self.request_device_code().await?;

        match &device.message {
            Some(message) => println!("{}", message),
            None => println!(
                "To sign in, open {} and enter the code {}",
                device.verification_uri, device.user_code
            ),
        }
        if !login_hint.is_empty() {
            println!("Please sign in with: {}", login_hint);
        }
        tracing::info!(
            verification_uri = %device.verification_uri,
            "Waiting for device-code sign-in"
        );

        self.poll_for_token(&device).await
    }

    async fn request_device_code(&self) -> Result<DeviceCodeResponse> {
        let url = format!("{}/oauth2/v2.0/devicecode", self.authority);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Authentication(format!(
                "device code request failed ({}): {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }

    async fn poll_for_token(&self, device: &DeviceCodeResponse) -> Result<TokenGrant> {
        let url = format!("{}/oauth2/v2.0/token", self.authority);
        let mut interval = device.interval.max(1);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(device.expires_in);

        loop {
            tokio::time::sleep(Duration::from_secs(interval)).await;
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Authentication(
                    "device code expired before sign-in completed".to_string(),
                ));
            }

            let response = self
                .http
                .post(&url)
                .form(&[
                    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                    ("client_id", self.client_id.as_str()),
                    ("device_code", device.device_code.as_str()),
                ])
                .send()
                .await?;

            let body: TokenResponse = response.json().await?;

            if let Some(access_token) = body.access_token {
                return Ok(TokenGrant {
                    access_token,
                    expires_in: body.expires_in,
                    refresh_token: body.refresh_token,
                });
            }

            match body.error.as_deref() {
                Some("authorization_pending") => continue,
                Some("slow_down") => {
                    interval += 5;
                    continue;
                }
                _ => {
                    let description = body
                        .error_description
                        .or(body.error)
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(Error::Authentication(description));
                }
            }
        }
    }

    /// Redeem a refresh token for a fresh access token.
    ///
    /// This is the silent half of the chain: no operator interaction, just
    /// one POST against the token endpoint.
    pub async fn redeem_refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        let url = format!("{}/oauth2/v2.0/token", self.authority);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("scope", self.scope.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let body: TokenResponse = response.json().await?;

        match body.access_token {
            Some(access_token) => Ok(TokenGrant {
                access_token,
                expires_in: body.expires_in,
                refresh_token: body.refresh_token,
            }),
            None => {
                let description = body
                    .error_description
                    .or(body.error)
                    .unwrap_or_else(|| "unknown error".to_string());
                Err(Error::Authentication(format!(
                    "silent token refresh failed: {}",
                    description
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_and_authority_shape() {
        let flow = DeviceCodeFlow::new(
            "8f08bcba-e79b-4aec-ba55-e46e7343c5f5",
            "51f81489-12ee-4a9e-aaae-a2591f45987d",
            "https://contoso.crm.dynamics.com/",
        )
        .unwrap();

        assert_eq!(
            flow.authority,
            "https://login.microsoftonline.com/8f08bcba-e79b-4aec-ba55-e46e7343c5f5"
        );
        assert_eq!(flow.scope, "https://contoso.crm.dynamics.com/.default");
    }

    #[test]
    fn test_token_response_parses_pending_error() {
        let body: TokenResponse = serde_json::from_str(
            r#"{"error": "authorization_pending", "error_description": "still waiting"}"#,
        )
        .unwrap();
        assert!(body.access_token.is_none());
        assert_eq!(body.error.as_deref(), Some("authorization_pending"));
    }

    #[test]
    fn test_device_code_response_defaults_interval() {
        let body: DeviceCodeResponse = serde_json::from_str(
            r#"{
                "device_code": "dc",
                "user_code": "ABC123",
                "verification_uri": "https://microsoft.com/devicelogin",
                "expires_in": 900
            }"#,
        )
        .unwrap();
        assert_eq!(body.interval, 5);
        assert!(body.message.is_none());
    }
}
