//! `SeaORM` implementation of the `AuthService` trait.

use async_trait::async_trait;

use crate::config::SecurityConfig;
use crate::db::{Store, User};
use crate::services::auth_service::{AuthError, AuthService, UserInfo};
use crate::session::SessionUser;
use crate::username;

pub struct SeaOrmAuthService {
    store: Store,
    security: SecurityConfig,
}

impl SeaOrmAuthService {
    #[must_use]
    pub const fn new(store: Store, security: SecurityConfig) -> Self {
        Self { store, security }
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

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < 8 {
        return Err(AuthError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<SessionUser, AuthError> {
        username::validate(username).map_err(|msg| AuthError::Validation(msg.to_string()))?;
        validate_password(password)?;

        if !email.contains('@') || email.len() > 254 {
            return Err(AuthError::Validation(
                "A valid email address is required".to_string(),
            ));
        }

        if self.store.username_taken(username).await? {
            return Err(AuthError::Validation(
                "Username is already taken".to_string(),
            ));
        }
        if self.store.get_user_by_email(email).await?.is_some() {
            return Err(AuthError::Validation(
                "Email address is already in use".to_string(),
            ));
        }

        let user = self
            .store
            .create_local_user(username, email, password, false, &self.security)
            .await?;

        tracing::info!(user_id = user.id, "Registered local account");

        Ok(session_user(&user))
    }

    async fn login(&self, username: &str, password: &str) -> Result<SessionUser, AuthError> {
        let is_valid = self.store.verify_user_password(username, password).await?;

        if !is_valid {
            return Err(AuthError::InvalidCredentials);
        }

        let user = self
            .store
            .get_user_by_username(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        self.store.touch_last_login(user.id).await?;

        Ok(session_user(&user))
    }

    async fn get_user_info(&self, user_id: i32) -> Result<UserInfo, AuthError> {
        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::Internal(format!("User {user_id} not found")))?;

        Ok(UserInfo {
            id: user.id,
            username: user.username,
            email: user.email,
            has_set_password: user.has_set_password,
            is_admin: user.is_admin,
            created_at: user.created_at,
            last_login: user.last_login,
        })
    }

    async fn set_password(&self, user_id: i32, password: &str) -> Result<(), AuthError> {
        validate_password(password)?;

        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::Internal(format!("User {user_id} not found")))?;

        if user.has_set_password {
            return Err(AuthError::Validation(
                "A password is already set for this account".to_string(),
            ));
        }

        let linked = self.store.list_oauth_accounts(user_id).await?;
        if linked.is_empty() {
            return Err(AuthError::Validation(
                "Account has no linked provider to fall back on".to_string(),
            ));
        }

        self.store
            .set_user_password(user_id, password, &self.security)
            .await?;

        tracing::info!(user_id, "Password set on federated account");

        Ok(())
    }
}
