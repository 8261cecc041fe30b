use sea_orm_migration::prelude::*;

mod m20260801_add_users;
mod m20260802_add_oauth_accounts;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260801_add_users::Migration),
            Box::new(m20260802_add_oauth_accounts::Migration),
        ]
    }
}
