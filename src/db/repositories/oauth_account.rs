use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};

use crate::entities::oauth_accounts;
use crate::models::identity::NormalizedIdentity;

pub struct OAuthAccountRepository {
    conn: DatabaseConnection,
}

impl OAuthAccountRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get_by_provider_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<oauth_accounts::Model>> {
        let account = oauth_accounts::Entity::find()
            .filter(oauth_accounts::Column::Provider.eq(provider))
            .filter(oauth_accounts::Column::ProviderAccountId.eq(provider_account_id))
            .one(&self.conn)
            .await
            .context("Failed to query linked account by provider identity")?;

        Ok(account)
    }

    pub async fn list_for_user(&self, user_id: i32) -> Result<Vec<oauth_accounts::Model>> {
        let accounts = oauth_accounts::Entity::find()
            .filter(oauth_accounts::Column::UserId.eq(user_id))
            .order_by_asc(oauth_accounts::Column::Provider)
            .all(&self.conn)
            .await
            .context("Failed to list linked accounts")?;

        Ok(accounts)
    }

    /// Refresh cached profile fields and tokens on an existing row.
    pub async fn refresh(
        &self,
        account: oauth_accounts::Model,
        identity: &NormalizedIdentity,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();

        let mut active: oauth_accounts::ActiveModel = account.into();
        active.username = Set(Some(identity.username.clone()));
        active.display_name = Set(identity.display_name.clone());
        active.avatar_url = Set(identity.avatar_url.clone());
        active.profile_url = Set(identity.profile_url.clone());
        active.access_token = Set(identity.access_token.clone());
        active.scope = Set(identity.scope.clone());
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }

    /// Attach a provider identity to an existing user (implicit email link
    /// during login). Single insert; uniqueness indexes guard races.
    pub async fn attach_to_user(
        &self,
        user_id: i32,
        identity: &NormalizedIdentity,
    ) -> Result<oauth_accounts::Model> {
        let now = chrono::Utc::now().to_rfc3339();

        let account = oauth_accounts::ActiveModel {
            provider: Set(identity.provider.clone()),
            provider_account_id: Set(identity.provider_account_id.clone()),
            user_id: Set(user_id),
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
        .insert(&self.conn)
        .await
        .context("Failed to attach linked account")?;

        Ok(account)
    }

    /// Explicit-link upsert: replaces any prior row this user holds for the
    /// provider, inside one transaction, so a user keeps at most one linked
    /// account per provider.
    pub async fn upsert_link(&self, user_id: i32, identity: &NormalizedIdentity) -> Result<()> {
        let identity = identity.clone();
        let now = chrono::Utc::now().to_rfc3339();

        self.conn
            .transaction::<_, (), sea_orm::DbErr>(|txn| {
                Box::pin(async move {
                    oauth_accounts::Entity::delete_many()
                        .filter(oauth_accounts::Column::UserId.eq(user_id))
                        .filter(oauth_accounts::Column::Provider.eq(identity.provider.clone()))
                        .exec(txn)
                        .await?;

                    oauth_accounts::ActiveModel {
                        provider: Set(identity.provider.clone()),
                        provider_account_id: Set(identity.provider_account_id.clone()),
                        user_id: Set(user_id),
                        username: Set(Some(identity.username.clone())),
                        display_name: Set(identity.display_name.clone()),
                        avatar_url: Set(identity.avatar_url.clone()),
                        profile_url: Set(identity.profile_url.clone()),
                        access_token: Set(identity.access_token.clone()),
                        scope: Set(identity.scope.clone()),
                        created_at: Set(now.clone()),
                        updated_at: Set(now.clone()),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await?;

                    Ok(())
                })
            })
            .await
            .context("Failed to upsert linked account")?;

        Ok(())
    }

    /// Delete this user's rows for a provider; returns the number removed.
    pub async fn delete_for_user_provider(&self, user_id: i32, provider: &str) -> Result<u64> {
        let result = oauth_accounts::Entity::delete_many()
            .filter(oauth_accounts::Column::UserId.eq(user_id))
            .filter(oauth_accounts::Column::Provider.eq(provider))
            .exec(&self.conn)
            .await
            .context("Failed to delete linked account")?;

        Ok(result.rows_affected)
    }
}
