use serde::{Deserialize, Serialize};

/// Provider-agnostic identity record produced by a `ProviderClient`.
///
/// This is the single shape the resolver and repositories work with; the
/// provider-specific wire formats never leave `crate::clients`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedIdentity {
    pub provider: String,

    pub provider_account_id: String,

    /// Provider-side login or handle; the base username is derived from it.
    pub username: String,

    pub display_name: Option<String>,

    pub avatar_url: Option<String>,

    pub profile_url: Option<String>,

    /// Always present after normalization; a synthesized placeholder when
    /// the provider supplied no address.
    pub email: Option<String>,

    /// Placeholder addresses are never verified.
    pub email_verified: bool,

    pub access_token: String,

    pub scope: Option<String>,
}

/// Result of exchanging an authorization code on the back channel.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub scope: Option<String>,
}
