//! Domain service for external identity federation and account linking.

use serde::Serialize;

use crate::models::identity::NormalizedIdentity;
use crate::services::auth_service::AuthError;
use crate::session::SessionUser;

/// Outcome of resolving a login-mode callback.
#[derive(Debug)]
pub enum LoginResolution {
    /// Session should be bound to this user.
    SignedIn(SessionUser),

    /// The derived username is taken. No user was created; the caller
    /// stashes the identity as a pending signup and the client retries with
    /// another name.
    UsernameConflict { base_username: String },
}

/// One linked provider, as exposed to the frontend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedProvider {
    pub provider: String,
    pub username: Option<String>,
    pub profile_url: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

/// Domain service trait for identity federation.
#[async_trait::async_trait]
pub trait IdentityService: Send + Sync {
    /// Login-mode decision tree: existing linked account, implicit link via
    /// email, new account, or deferred conflict, in that order.
    async fn resolve_login(
        &self,
        identity: &NormalizedIdentity,
    ) -> Result<LoginResolution, AuthError>;

    /// Link-mode: bind the identity to the initiating user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AlreadyLinkedElsewhere`] (with no writes) when
    /// the identity belongs to a different user.
    async fn link_account(
        &self,
        user_id: i32,
        identity: &NormalizedIdentity,
    ) -> Result<(), AuthError>;

    /// Finish a deferred signup with the client-chosen username.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] on an invalid or taken name; the
    /// caller keeps the pending signup so the client may retry.
    async fn complete_signup(
        &self,
        identity: &NormalizedIdentity,
        username: &str,
    ) -> Result<SessionUser, AuthError>;

    /// Providers currently linked to a user.
    async fn linked_providers(&self, user_id: i32) -> Result<Vec<LinkedProvider>, AuthError>;

    /// Remove a linked provider, refusing to strand the account.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotLinked`] when the provider is not linked and
    /// [`AuthError::CannotUnlinkOnlyMethod`] when it is the last remaining
    /// sign-in method.
    async fn unlink(&self, user_id: i32, provider: &str) -> Result<(), AuthError>;
}
