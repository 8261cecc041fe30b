//! Outbound HTTP collaborators: the OAuth identity providers.
//!
//! Each provider implements [`ProviderClient`]; handlers reach them through
//! the [`ProviderRegistry`], built once at startup from the config snapshot.
//! Adding a provider means adding an implementation and a registry entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::OAuthConfig;
use crate::models::identity::{NormalizedIdentity, TokenGrant};

pub mod github;
pub mod google;

pub use github::GithubClient;
pub use google::GoogleClient;

/// Domain for addresses synthesized when a provider supplies no email.
pub const PLACEHOLDER_EMAIL_DOMAIN: &str = "users.noreply.murmur.social";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} OAuth client secret is not configured")]
    MissingSecret { provider: &'static str },

    #[error("{provider} token exchange failed: {detail}")]
    Exchange {
        provider: &'static str,
        detail: String,
    },

    #[error("{provider} profile fetch failed: {detail}")]
    Profile {
        provider: &'static str,
        detail: String,
    },
}

/// One OAuth2 authorization-code provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Authorize URL for the first OAuth leg. `redirect_uri` must be the
    /// exact string later passed to [`ProviderClient::exchange_code`]; the
    /// provider rejects the exchange otherwise.
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String;

    /// Exchange an authorization code for an access token on the back
    /// channel. Any non-2xx response is a fatal step failure, not retried.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError>;

    /// Fetch the remote profile and normalize it into the common identity
    /// record.
    async fn fetch_identity(&self, grant: &TokenGrant)
    -> Result<NormalizedIdentity, ProviderError>;
}

/// Configured providers keyed by name.
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn from_config(oauth: &OAuthConfig, http: reqwest::Client) -> Self {
        let mut providers: HashMap<&'static str, Arc<dyn ProviderClient>> = HashMap::new();

        if oauth.github.is_configured() {
            providers.insert(
                "github",
                Arc::new(GithubClient::new(oauth.github.clone(), http.clone())),
            );
        }
        if oauth.google.is_configured() {
            providers.insert(
                "google",
                Arc::new(GoogleClient::new(oauth.google.clone(), http)),
            );
        }

        Self { providers }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderClient>> {
        self.providers.get(name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.providers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Synthesized address satisfying the email-uniqueness constraint for
/// provider identities without one. Distinct per provider identity, never
/// treated as verified.
#[must_use]
pub fn placeholder_email(provider: &str, provider_account_id: &str) -> String {
    format!("{provider}_{provider_account_id}@{PLACEHOLDER_EMAIL_DOMAIN}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    #[test]
    fn test_placeholder_emails_distinct_per_identity() {
        let a = placeholder_email("github", "100");
        let b = placeholder_email("github", "200");
        assert_ne!(a, b);
        assert_eq!(a, "github_100@users.noreply.murmur.social");
    }

    #[test]
    fn test_registry_only_exposes_configured_providers() {
        let oauth = OAuthConfig {
            github: ProviderSettings {
                client_id: "abc".to_string(),
                client_secret: "shh".to_string(),
                redirect_uri: None,
            },
            ..OAuthConfig::default()
        };

        let registry = ProviderRegistry::from_config(&oauth, reqwest::Client::new());
        assert!(registry.get("github").is_some());
        assert!(registry.get("google").is_none());
        assert!(registry.get("gitlab").is_none());
        assert_eq!(registry.names(), vec!["github"]);
    }
}
