use crate::entities::oauth_accounts;
use crate::entities::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        manager
            .create_table(
                schema
                    .create_table_from_entity(OauthAccounts)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // A provider identity belongs to at most one account, ever.
        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_accounts_provider_account")
                    .table(OauthAccounts)
                    .col(oauth_accounts::Column::Provider)
                    .col(oauth_accounts::Column::ProviderAccountId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // A user holds at most one linked account per provider.
        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_accounts_user_provider")
                    .table(OauthAccounts)
                    .col(oauth_accounts::Column::UserId)
                    .col(oauth_accounts::Column::Provider)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OauthAccounts).to_owned())
            .await?;

        Ok(())
    }
}
