use sea_orm::entity::prelude::*;

/// One external identity linked to a local user.
///
/// `(provider, provider_account_id)` identifies at most one row, and a user
/// holds at most one row per provider; both are enforced by unique indexes.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub provider: String,

    pub provider_account_id: String,

    pub user_id: i32,

    /// Cached profile fields, refreshed on every federated login.
    pub username: Option<String>,

    pub display_name: Option<String>,

    pub avatar_url: Option<String>,

    pub profile_url: Option<String>,

    pub access_token: String,

    pub scope: Option<String>,

    pub created_at: String,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id"
    )]
    Users,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
