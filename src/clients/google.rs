use async_trait::async_trait;
use serde::Deserialize;

use super::{ProviderClient, ProviderError, placeholder_email};
use crate::config::ProviderSettings;
use crate::models::identity::{NormalizedIdentity, TokenGrant};
use crate::username;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const SCOPES: &str = "openid email profile";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OpenID Connect userinfo; no secondary call needed.
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

pub struct GoogleClient {
    settings: ProviderSettings,
    http: reqwest::Client,
}

impl GoogleClient {
    #[must_use]
    pub const fn new(settings: ProviderSettings, http: reqwest::Client) -> Self {
        Self { settings, http }
    }
}

/// Google has no login handle; derive one from the email local part, the
/// display name, or the subject id, in that order.
fn derive_login(info: &GoogleUserInfo) -> String {
    if let Some(email) = &info.email
        && let Some(local) = email.split('@').next()
        && !local.is_empty()
    {
        return username::derive_base(local);
    }
    if let Some(name) = &info.name {
        return username::derive_base(name);
    }
    username::derive_base(&format!("google_{}", info.sub))
}

#[async_trait]
impl ProviderClient for GoogleClient {
    fn name(&self) -> &'static str {
        "google"
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{AUTHORIZE_URL}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(SCOPES),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError> {
        if self.settings.client_secret.is_empty() {
            return Err(ProviderError::MissingSecret { provider: "google" });
        }

        let response = self
            .http
            .post(TOKEN_URL)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Exchange {
                provider: "google",
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Exchange {
                provider: "google",
                detail: format!("HTTP {status}: {body}"),
            });
        }

        let token: TokenResponse =
            response.json().await.map_err(|e| ProviderError::Exchange {
                provider: "google",
                detail: format!("Invalid JSON: {e}"),
            })?;

        let access_token = token.access_token.ok_or_else(|| ProviderError::Exchange {
            provider: "google",
            detail: token
                .error_description
                .or(token.error)
                .unwrap_or_else(|| "no access token in response".to_string()),
        })?;

        Ok(TokenGrant {
            access_token,
            scope: token.scope,
        })
    }

    async fn fetch_identity(
        &self,
        grant: &TokenGrant,
    ) -> Result<NormalizedIdentity, ProviderError> {
        let response = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(&grant.access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Profile {
                provider: "google",
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::Profile {
                provider: "google",
                detail: format!("HTTP {}", response.status()),
            });
        }

        let info: GoogleUserInfo =
            response.json().await.map_err(|e| ProviderError::Profile {
                provider: "google",
                detail: format!("Invalid JSON: {e}"),
            })?;

        let login = derive_login(&info);
        let email_verified = info.email_verified.unwrap_or(false) && info.email.is_some();
        let email = info
            .email
            .unwrap_or_else(|| placeholder_email("google", &info.sub));

        Ok(NormalizedIdentity {
            provider: "google".to_string(),
            provider_account_id: info.sub,
            username: login,
            display_name: info.name,
            avatar_url: info.picture,
            profile_url: None,
            email: Some(email),
            email_verified,
            access_token: grant.access_token.clone(),
            scope: grant.scope.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    fn client() -> GoogleClient {
        GoogleClient::new(
            ProviderSettings {
                client_id: "test-google-client".to_string(),
                client_secret: "test-secret".to_string(),
                redirect_uri: None,
            },
            reqwest::Client::new(),
        )
    }

    fn info(email: Option<&str>, name: Option<&str>) -> GoogleUserInfo {
        GoogleUserInfo {
            sub: "110101".to_string(),
            email: email.map(str::to_string),
            email_verified: Some(true),
            name: name.map(str::to_string),
            picture: None,
        }
    }

    #[test]
    fn test_authorize_url_is_code_flow() {
        let url = client().authorize_url("https://api.murmur.example/api/auth/google/callback", "xyz");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=test-google-client"));
        assert!(url.contains("scope=openid%20email%20profile"));
        assert!(url.contains("state=xyz"));
    }

    #[test]
    fn test_login_derived_from_email_local_part() {
        assert_eq!(derive_login(&info(Some("jane.doe@gmail.com"), None)), "jane_doe");
    }

    #[test]
    fn test_login_falls_back_to_name_then_sub() {
        assert_eq!(derive_login(&info(None, Some("Jane Doe"))), "jane_doe");
        assert_eq!(derive_login(&info(None, None)), "google_110101");
    }
}
