use async_trait::async_trait;
use serde::Deserialize;

use super::{ProviderClient, ProviderError, placeholder_email};
use crate::config::ProviderSettings;
use crate::models::identity::{NormalizedIdentity, TokenGrant};

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";
const EMAILS_URL: &str = "https://api.github.com/user/emails";

const SCOPES: &str = "read:user user:email";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

pub struct GithubClient {
    settings: ProviderSettings,
    http: reqwest::Client,
}

impl GithubClient {
    #[must_use]
    pub const fn new(settings: ProviderSettings, http: reqwest::Client) -> Self {
        Self { settings, http }
    }

    /// Secondary lookup for accounts whose primary profile omits the email.
    /// Failures here are swallowed; the caller falls back to a placeholder.
    async fn fetch_primary_email(&self, access_token: &str) -> (Option<String>, bool) {
        let response = self
            .http
            .get(EMAILS_URL)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .bearer_auth(access_token)
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(status = %r.status(), "GitHub email lookup returned non-success; continuing without email");
                return (None, false);
            }
            Err(e) => {
                tracing::debug!(error = %e, "GitHub email lookup failed; continuing without email");
                return (None, false);
            }
        };

        match response.json::<Vec<GithubEmail>>().await {
            Ok(emails) => select_email(&emails),
            Err(e) => {
                tracing::debug!(error = %e, "GitHub email list did not parse; continuing without email");
                (None, false)
            }
        }
    }
}

/// Selection order: primary+verified, primary, verified, first available.
fn select_email(emails: &[GithubEmail]) -> (Option<String>, bool) {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.primary))
        .or_else(|| emails.iter().find(|e| e.verified))
        .or_else(|| emails.first())
        .map_or((None, false), |e| (Some(e.email.clone()), e.verified))
}

#[async_trait]
impl ProviderClient for GithubClient {
    fn name(&self) -> &'static str {
        "github"
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{AUTHORIZE_URL}?client_id={}&redirect_uri={}&scope={}&state={}",
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
            return Err(ProviderError::MissingSecret { provider: "github" });
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
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Exchange {
                provider: "github",
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Exchange {
                provider: "github",
                detail: format!("HTTP {status}: {body}"),
            });
        }

        let token: TokenResponse =
            response.json().await.map_err(|e| ProviderError::Exchange {
                provider: "github",
                detail: format!("Invalid JSON: {e}"),
            })?;

        let access_token = token.access_token.ok_or_else(|| ProviderError::Exchange {
            provider: "github",
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
            .get(USER_URL)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .bearer_auth(&grant.access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Profile {
                provider: "github",
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::Profile {
                provider: "github",
                detail: format!("HTTP {}", response.status()),
            });
        }

        let user: GithubUser = response.json().await.map_err(|e| ProviderError::Profile {
            provider: "github",
            detail: format!("Invalid JSON: {e}"),
        })?;

        let provider_account_id = user.id.to_string();

        // Primary profile email when present, otherwise the emails endpoint,
        // otherwise a synthesized placeholder.
        let (email, email_verified) = match user.email {
            Some(email) => (Some(email), true),
            None => self.fetch_primary_email(&grant.access_token).await,
        };
        let (email, email_verified) = match email {
            Some(email) => (email, email_verified),
            None => (placeholder_email("github", &provider_account_id), false),
        };

        Ok(NormalizedIdentity {
            provider: "github".to_string(),
            provider_account_id,
            username: user.login.clone(),
            display_name: user.name.or(Some(user.login)),
            avatar_url: user.avatar_url,
            profile_url: user.html_url,
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

    fn client() -> GithubClient {
        GithubClient::new(
            ProviderSettings {
                client_id: "test-client-id".to_string(),
                client_secret: "test-secret".to_string(),
                redirect_uri: None,
            },
            reqwest::Client::new(),
        )
    }

    fn email(address: &str, primary: bool, verified: bool) -> GithubEmail {
        GithubEmail {
            email: address.to_string(),
            primary,
            verified,
        }
    }

    #[test]
    fn test_authorize_url_carries_state_and_redirect() {
        let url = client().authorize_url("http://localhost:8470/api/auth/github/callback", "abc123");
        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(url.contains("client_id=test-client-id"));
        assert!(url.contains("state=abc123"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8470%2Fapi%2Fauth%2Fgithub%2Fcallback"));
        assert!(url.contains("scope=read%3Auser%20user%3Aemail"));
    }

    #[test]
    fn test_email_selection_prefers_primary_verified() {
        let emails = vec![
            email("other@example.com", false, true),
            email("main@example.com", true, true),
        ];
        assert_eq!(
            select_email(&emails),
            (Some("main@example.com".to_string()), true)
        );
    }

    #[test]
    fn test_email_selection_order_degrades() {
        let emails = vec![
            email("unverified-primary@example.com", true, false),
            email("verified@example.com", false, true),
        ];
        // Primary outranks verified-only.
        assert_eq!(
            select_email(&emails),
            (Some("unverified-primary@example.com".to_string()), false)
        );

        let emails = vec![
            email("first@example.com", false, false),
            email("verified@example.com", false, true),
        ];
        assert_eq!(
            select_email(&emails),
            (Some("verified@example.com".to_string()), true)
        );

        let emails = vec![email("only@example.com", false, false)];
        assert_eq!(
            select_email(&emails),
            (Some("only@example.com".to_string()), false)
        );

        assert_eq!(select_email(&[]), (None, false));
    }

    #[test]
    fn test_placeholder_domain_matches_platform() {
        assert!(
            placeholder_email("github", "7").ends_with(crate::clients::PLACEHOLDER_EMAIL_DOMAIN)
        );
    }
}
