use anyhow::{Context, Result};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sea_orm::sea_query::{Expr, Func, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use tokio::task;

use crate::config::SecurityConfig;
use crate::entities::{oauth_accounts, users};
use crate::models::identity::NormalizedIdentity;

/// User data returned from the repository (password hash withheld).
#[derive(Debug, Clone)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
    pub has_set_password: bool,
    pub is_admin: bool,
    pub created_at: String,
    pub updated_at: String,
    pub last_login: Option<String>,
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            email: model.email,
            has_set_password: model.has_set_password,
            is_admin: model.is_admin,
            created_at: model.created_at,
            updated_at: model.updated_at,
            last_login: model.last_login,
        }
    }
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Case-insensitive username match; pairs with the `lower(username)`
    /// unique index.
    fn username_eq(username: &str) -> SimpleExpr {
        Expr::expr(Func::lower(Expr::col(users::Column::Username))).eq(username.to_lowercase())
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(Self::username_eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user by username")?;

        Ok(user.map(User::from))
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<User>> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        Ok(user.map(User::from))
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.conn)
            .await
            .context("Failed to query user by email")?;

        Ok(user.map(User::from))
    }

    pub async fn username_taken(&self, username: &str) -> Result<bool> {
        Ok(self.get_by_username(username).await?.is_some())
    }

    /// Create a local password account. `has_set_password` starts true.
    pub async fn create_local(
        &self,
        username: &str,
        email: &str,
        password: &str,
        is_admin: bool,
        config: &SecurityConfig,
    ) -> Result<User> {
        let password = password.to_string();
        let config = config.clone();
        let password_hash = task::spawn_blocking(move || hash_password(&password, Some(&config)))
            .await
            .context("Password hashing task panicked")??;

        let now = chrono::Utc::now().to_rfc3339();

        let user = users::ActiveModel {
            username: Set(username.to_string()),
            email: Set(Some(email.to_string())),
            password_hash: Set(Some(password_hash)),
            has_set_password: Set(true),
            is_admin: Set(is_admin),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            last_login: Set(None),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert user")?;

        Ok(User::from(user))
    }

    /// Create a federated account plus its first linked provider identity in
    /// one transaction. The account starts without a usable password.
    pub async fn create_federated(
        &self,
        username: &str,
        identity: &NormalizedIdentity,
    ) -> Result<User> {
        let now = chrono::Utc::now().to_rfc3339();
        let username = username.to_string();
        let identity = identity.clone();

        let user = self
            .conn
            .transaction::<_, users::Model, sea_orm::DbErr>(|txn| {
                Box::pin(async move {
                    let user = users::ActiveModel {
                        username: Set(username),
                        email: Set(identity.email.clone()),
                        password_hash: Set(None),
                        has_set_password: Set(false),
                        is_admin: Set(false),
                        created_at: Set(now.clone()),
                        updated_at: Set(now.clone()),
                        last_login: Set(Some(now.clone())),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await?;

                    oauth_accounts::ActiveModel {
                        provider: Set(identity.provider.clone()),
                        provider_account_id: Set(identity.provider_account_id.clone()),
                        user_id: Set(user.id),
                        username: Set(Some(identity.username.clone())),
                        display_name: Set(identity.display_name.clone()),
                        avatar_url: Set(identity.avatar_url.clone()),
                        profile_url: Set(identity.profile_url.clone()),
                        access_token: Set(identity.access_token.clone()),
                        scope: Set(identity.scope.clone()),
                        created_at: Set(now.clone()),
                        updated_at: Set(now),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await?;

                    Ok(user)
                })
            })
            .await
            .context("Failed to create federated user")?;

        Ok(User::from(user))
    }

    /// Verify a password for a user. Accounts without a stored hash (pure
    /// federation accounts) never verify.
    ///
    /// Runs on `spawn_blocking` because Argon2 verification is CPU-intensive
    /// and would block the async runtime if run directly.
    pub async fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        let user = users::Entity::find()
            .filter(Self::username_eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user for password verification")?;

        let Some(user) = user else {
            return Ok(false);
        };

        let Some(password_hash) = user.password_hash else {
            return Ok(false);
        };

        if !user.has_set_password {
            return Ok(false);
        }

        let password = password.to_string();

        let is_valid = task::spawn_blocking(move || {
            let parsed_hash = PasswordHash::new(&password_hash)
                .map_err(|e| anyhow::anyhow!("Invalid password hash format: {e}"))?;

            let argon2 = Argon2::default();
            Ok::<bool, anyhow::Error>(
                argon2
                    .verify_password(password.as_bytes(), &parsed_hash)
                    .is_ok(),
            )
        })
        .await
        .context("Password verification task panicked")??;

        Ok(is_valid)
    }

    /// Store a new password hash and mark the account as having one.
    pub async fn set_password(
        &self,
        user_id: i32,
        password: &str,
        config: &SecurityConfig,
    ) -> Result<()> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query user for password update")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {user_id}"))?;

        let password = password.to_string();
        let config = config.clone();
        let new_hash = task::spawn_blocking(move || hash_password(&password, Some(&config)))
            .await
            .context("Password hashing task panicked")??;

        let now = chrono::Utc::now().to_rfc3339();

        let mut active: users::ActiveModel = user.into();
        active.password_hash = Set(Some(new_hash));
        active.has_set_password = Set(true);
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn touch_last_login(&self, user_id: i32) -> Result<()> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query user for login timestamp")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {user_id}"))?;

        let now = chrono::Utc::now().to_rfc3339();

        let mut active: users::ActiveModel = user.into();
        active.last_login = Set(Some(now));
        active.update(&self.conn).await?;

        Ok(())
    }
}

/// Hash a password using Argon2id with optional custom params.
/// If config is None, uses library defaults.
pub fn hash_password(password: &str, config: Option<&SecurityConfig>) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let argon2 = if let Some(cfg) = config {
        let params = Params::new(
            cfg.argon2_memory_cost_kib,
            cfg.argon2_time_cost,
            cfg.argon2_parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    } else {
        Argon2::default()
    };

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}
