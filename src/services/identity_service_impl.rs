//! `SeaORM` implementation of the `IdentityService` trait.

use async_trait::async_trait;

use crate::db::{Store, User};
use crate::models::identity::NormalizedIdentity;
use crate::services::auth_service::AuthError;
use crate::services::identity_service::{
    IdentityService, LinkedProvider, LoginResolution,
};
use crate::session::SessionUser;
use crate::username;

pub struct SeaOrmIdentityService {
    store: Store,
}

impl SeaOrmIdentityService {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }
}

fn session_user(user: &User) -> SessionUser {
    SessionUser {
        user_id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        is_admin: user.is_admin,
    }
}

#[async_trait]
impl IdentityService for SeaOrmIdentityService {
    async fn resolve_login(
        &self,
        identity: &NormalizedIdentity,
    ) -> Result<LoginResolution, AuthError> {
        // Known provider identity: refresh the cached profile and sign in
        // its owner.
        if let Some(account) = self
            .store
            .get_oauth_account(&identity.provider, &identity.provider_account_id)
            .await?
        {
            let user_id = account.user_id;
            self.store.refresh_oauth_account(account, identity).await?;
            self.store.touch_last_login(user_id).await?;

            let user = self
                .store
                .get_user_by_id(user_id)
                .await?
                .ok_or_else(|| AuthError::Internal(format!("Linked user {user_id} missing")))?;

            tracing::info!(user_id, provider = %identity.provider, "Federated login via existing link");
            return Ok(LoginResolution::SignedIn(session_user(&user)));
        }

        // Unknown identity whose email matches an existing user: link
        // implicitly and sign in. Placeholder addresses never collide, so
        // this branch only fires on a provider-supplied email.
        if let Some(email) = identity.email.as_deref()
            && let Some(user) = self.store.get_user_by_email(email).await?
        {
            self.store.attach_oauth_account(user.id, identity).await?;
            self.store.touch_last_login(user.id).await?;

            tracing::info!(user_id = user.id, provider = %identity.provider, "Federated login linked by email");
            return Ok(LoginResolution::SignedIn(session_user(&user)));
        }

        // Brand-new identity: create an account, unless the derived
        // username collides; then defer without writing anything.
        let base_username = username::derive_base(&identity.username);
        if self.store.username_taken(&base_username).await? {
            tracing::info!(provider = %identity.provider, base_username, "Deferring signup on username conflict");
            return Ok(LoginResolution::UsernameConflict { base_username });
        }

        let user = self
            .store
            .create_federated_user(&base_username, identity)
            .await?;

        tracing::info!(user_id = user.id, provider = %identity.provider, "Created account via federation");
        Ok(LoginResolution::SignedIn(session_user(&user)))
    }

    async fn link_account(
        &self,
        user_id: i32,
        identity: &NormalizedIdentity,
    ) -> Result<(), AuthError> {
        if let Some(existing) = self
            .store
            .get_oauth_account(&identity.provider, &identity.provider_account_id)
            .await?
        {
            if existing.user_id != user_id {
                return Err(AuthError::AlreadyLinkedElsewhere);
            }
            // Re-linking one's own identity just refreshes it.
            self.store.refresh_oauth_account(existing, identity).await?;
            return Ok(());
        }

        self.store.upsert_oauth_link(user_id, identity).await?;

        tracing::info!(user_id, provider = %identity.provider, "Linked provider account");
        Ok(())
    }

    async fn complete_signup(
        &self,
        identity: &NormalizedIdentity,
        requested_username: &str,
    ) -> Result<SessionUser, AuthError> {
        username::validate(requested_username)
            .map_err(|msg| AuthError::Validation(msg.to_string()))?;

        if self.store.username_taken(requested_username).await? {
            return Err(AuthError::Validation(
                "Username is already taken".to_string(),
            ));
        }

        let user = self
            .store
            .create_federated_user(requested_username, identity)
            .await?;

        tracing::info!(user_id = user.id, provider = %identity.provider, "Completed deferred signup");
        Ok(session_user(&user))
    }

    async fn linked_providers(&self, user_id: i32) -> Result<Vec<LinkedProvider>, AuthError> {
        let accounts = self.store.list_oauth_accounts(user_id).await?;

        Ok(accounts
            .into_iter()
            .map(|a| LinkedProvider {
                provider: a.provider,
                username: a.username,
                profile_url: a.profile_url,
                avatar_url: a.avatar_url,
                created_at: a.created_at,
            })
            .collect())
    }

    async fn unlink(&self, user_id: i32, provider: &str) -> Result<(), AuthError> {
        let accounts = self.store.list_oauth_accounts(user_id).await?;

        if !accounts.iter().any(|a| a.provider == provider) {
            return Err(AuthError::NotLinked);
        }

        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::Internal(format!("User {user_id} not found")))?;

        let remaining = usize::from(user.has_set_password)
            + accounts.iter().filter(|a| a.provider != provider).count();
        if remaining == 0 {
            return Err(AuthError::CannotUnlinkOnlyMethod);
        }

        self.store.delete_oauth_accounts(user_id, provider).await?;

        tracing::info!(user_id, provider, "Unlinked provider account");
        Ok(())
    }
}
