pub mod auth_service;
pub mod auth_service_impl;
pub mod identity_service;
pub mod identity_service_impl;

pub use auth_service::{AuthError, AuthService, UserInfo};
pub use auth_service_impl::SeaOrmAuthService;
pub use identity_service::{IdentityService, LinkedProvider, LoginResolution};
pub use identity_service_impl::SeaOrmIdentityService;
