//! Domain service for local password accounts.
//!
//! Registration, credential login, and the password surface of federated
//! accounts (setting a first password so a linked provider can be removed).

use serde::Serialize;
use thiserror::Error;

use crate::clients::ProviderError;
use crate::session::SessionUser;

/// Errors across authentication and identity federation.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Invalid or already-used OAuth state")]
    InvalidOAuthState,

    #[error("Callback is missing the authorization code")]
    MissingCode,

    #[error("No authenticated session user")]
    MissingSessionUser,

    #[error("Identity is already linked to a different account")]
    AlreadyLinkedElsewhere,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Provider is not linked")]
    NotLinked,

    #[error("Cannot unlink the only remaining sign-in method")]
    CannotUnlinkOnlyMethod,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl AuthError {
    /// Wire code carried back to the frontend in `authMessage`. Full
    /// diagnostics (tokens, raw HTTP bodies) stay in server logs.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ProviderNotConfigured(_) => "provider_not_configured",
            Self::InvalidOAuthState => "invalid_oauth_state",
            Self::MissingCode => "missing_code",
            Self::MissingSessionUser => "missing_session_user",
            Self::AlreadyLinkedElsewhere => "already_linked_elsewhere",
            Self::Provider(ProviderError::MissingSecret { .. }) => "server_missing_secret",
            Self::Provider(_) => "provider_error",
            Self::NotLinked => "not_linked",
            Self::CannotUnlinkOnlyMethod => "cannot_unlink_only_method",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Validation(_) => "validation_failed",
            Self::Session(_) | Self::Database(_) | Self::Internal(_) => "internal_error",
        }
    }
}

/// User info DTO for responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
    pub has_set_password: bool,
    pub is_admin: bool,
    pub created_at: String,
    pub last_login: Option<String>,
}

/// Domain service trait for local account authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Creates a local password account and returns the session binding.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] on bad input or taken
    /// username/email.
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<SessionUser, AuthError>;

    /// Verifies credentials and returns the session binding.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] if login fails; accounts
    /// without a set password never verify.
    async fn login(&self, username: &str, password: &str) -> Result<SessionUser, AuthError>;

    /// Gets fresh information for a user.
    async fn get_user_info(&self, user_id: i32) -> Result<UserInfo, AuthError>;

    /// Sets a first password on a federated account. Requires at least one
    /// linked provider and no password set yet.
    async fn set_password(&self, user_id: i32, password: &str) -> Result<(), AuthError>;
}
