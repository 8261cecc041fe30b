pub use super::oauth_accounts::Entity as OauthAccounts;
pub use super::users::Entity as Users;
