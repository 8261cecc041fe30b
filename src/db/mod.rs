use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::SecurityConfig;
use crate::entities::oauth_accounts;
use crate::models::identity::NormalizedIdentity;

pub mod migrator;
pub mod repositories;

pub use repositories::user::User;

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        // A pooled in-memory database is per-connection; keep a single one.
        let max_connections = if db_url.contains(":memory:") {
            1
        } else {
            max_connections
        };

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    fn oauth_repo(&self) -> repositories::oauth_account::OAuthAccountRepository {
        repositories::oauth_account::OAuthAccountRepository::new(self.conn.clone())
    }

    // ========== Users ==========

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.user_repo().get_by_username(username).await
    }

    pub async fn get_user_by_id(&self, id: i32) -> Result<Option<User>> {
        self.user_repo().get_by_id(id).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.user_repo().get_by_email(email).await
    }

    pub async fn username_taken(&self, username: &str) -> Result<bool> {
        self.user_repo().username_taken(username).await
    }

    pub async fn create_local_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        is_admin: bool,
        config: &SecurityConfig,
    ) -> Result<User> {
        self.user_repo()
            .create_local(username, email, password, is_admin, config)
            .await
    }

    pub async fn create_federated_user(
        &self,
        username: &str,
        identity: &NormalizedIdentity,
    ) -> Result<User> {
        self.user_repo().create_federated(username, identity).await
    }

    pub async fn verify_user_password(&self, username: &str, password: &str) -> Result<bool> {
        self.user_repo().verify_password(username, password).await
    }

    pub async fn set_user_password(
        &self,
        user_id: i32,
        password: &str,
        config: &SecurityConfig,
    ) -> Result<()> {
        self.user_repo()
            .set_password(user_id, password, config)
            .await
    }

    pub async fn touch_last_login(&self, user_id: i32) -> Result<()> {
        self.user_repo().touch_last_login(user_id).await
    }

    // ========== Linked provider accounts ==========

    pub async fn get_oauth_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<oauth_accounts::Model>> {
        self.oauth_repo()
            .get_by_provider_account(provider, provider_account_id)
            .await
    }

    pub async fn list_oauth_accounts(&self, user_id: i32) -> Result<Vec<oauth_accounts::Model>> {
        self.oauth_repo().list_for_user(user_id).await
    }

    pub async fn refresh_oauth_account(
        &self,
        account: oauth_accounts::Model,
        identity: &NormalizedIdentity,
    ) -> Result<()> {
        self.oauth_repo().refresh(account, identity).await
    }

    pub async fn attach_oauth_account(
        &self,
        user_id: i32,
        identity: &NormalizedIdentity,
    ) -> Result<oauth_accounts::Model> {
        self.oauth_repo().attach_to_user(user_id, identity).await
    }

    pub async fn upsert_oauth_link(
        &self,
        user_id: i32,
        identity: &NormalizedIdentity,
    ) -> Result<()> {
        self.oauth_repo().upsert_link(user_id, identity).await
    }

    pub async fn delete_oauth_accounts(&self, user_id: i32, provider: &str) -> Result<u64> {
        self.oauth_repo()
            .delete_for_user_provider(user_id, provider)
            .await
    }
}
