use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tower_sessions::Session;

use super::{ApiError, ApiResponse, AppState};
use crate::api::types::{
    LoginRequest, MessageResponse, RegisterRequest, SessionUserDto, SetPasswordRequest,
};
use crate::services::UserInfo;
use crate::session::{self, SessionUser};

// ============================================================================
// Middleware
// ============================================================================

/// Requires an authenticated session user; everything behind this rejects
/// anonymous requests with 401 before reaching a handler.
pub async fn auth_middleware(
    session: Session,
    request: Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    if let Ok(Some(user)) = session.get::<SessionUser>(session::USER_KEY).await {
        tracing::Span::current().record("user_id", user.user_id);
        return Ok(next.run(request).await);
    }

    Err(ApiError::unauthorized("Not authenticated"))
}

/// Get the bound user from the session, or 401.
pub async fn require_user(session: &Session) -> Result<SessionUser, ApiError> {
    session::current_user(session)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /auth/register
/// Create a local password account and sign it in.
pub async fn register(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<SessionUserDto>>, ApiError> {
    let user = state
        .auth_service()
        .register(
            payload.username.trim(),
            payload.email.trim(),
            &payload.password,
        )
        .await?;

    session::bind_user(&session, &user)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))?;

    Ok(Json(ApiResponse::success(user.into())))
}

/// POST /auth/login
/// Authenticate with username and password.
pub async fn login(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<SessionUserDto>>, ApiError> {
    if payload.username.is_empty() {
        return Err(ApiError::validation("Username is required"));
    }
    if payload.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }

    let user = state
        .auth_service()
        .login(payload.username.trim(), &payload.password)
        .await?;

    session::bind_user(&session, &user)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))?;

    Ok(Json(ApiResponse::success(user.into())))
}

/// POST /auth/logout
/// Invalidate the current session.
pub async fn logout(session: Session) -> impl IntoResponse {
    let _ = session.flush().await;
    (StatusCode::OK, "Logged out")
}

/// GET /auth/me
/// Current user information, fresh from the database.
pub async fn me(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<ApiResponse<UserInfo>>, ApiError> {
    let user = require_user(&session).await?;

    let info = state.auth_service().get_user_info(user.user_id).await?;

    Ok(Json(ApiResponse::success(info)))
}

/// POST /auth/set-password
/// Set a first password on a federated account, so the linked provider stops
/// being its only sign-in method.
pub async fn set_password(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<SetPasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let user = require_user(&session).await?;

    state
        .auth_service()
        .set_password(user.user_id, &payload.password)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse {
        message: "Password set".to_string(),
    })))
}
