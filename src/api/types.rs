use serde::{Deserialize, Serialize};

use crate::session::{OAuthMode, SessionUser};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteSignupRequest {
    pub username: String,
}

/// Query parameters accepted by `GET /auth/{provider}`.
#[derive(Debug, Deserialize)]
pub struct OAuthStartQuery {
    pub mode: Option<OAuthMode>,
    #[serde(rename = "returnTo")]
    pub return_to: Option<String>,
}

/// Query parameters the provider sends to the callback.
#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUserDto {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
    pub is_admin: bool,
}

impl From<SessionUser> for SessionUserDto {
    fn from(user: SessionUser) -> Self {
        Self {
            id: user.user_id,
            username: user.username,
            email: user.email,
            is_admin: user.is_admin,
        }
    }
}

/// Response of the deferred-signup completion endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSignupResponse {
    pub success: bool,
    pub user: SessionUserDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
