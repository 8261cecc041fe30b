//! Federated sign-in endpoints.
//!
//! The callback is a small state machine: state verified (and consumed,
//! success or failure), code exchanged, profile fetched, identity resolved,
//! session bound. Every terminal state, errors included, ends in a redirect
//! to the frontend carrying the outcome in the query string; the browser
//! never sees a bare 5xx mid-dance.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Redirect,
};
use std::sync::Arc;
use tower_sessions::Session;

use super::{ApiError, ApiResponse, AppState};
use crate::api::types::{
    CompleteSignupRequest, CompleteSignupResponse, MessageResponse, OAuthCallbackQuery,
    OAuthStartQuery,
};
use crate::config::{Config, ProviderSettings, ServerConfig};
use crate::services::{AuthError, LinkedProvider, LoginResolution};
use crate::session::{self, OAuthMode, OAuthWorkflow};

// ============================================================================
// Callback URL resolution
// ============================================================================

/// Resolve the callback URL for a provider; the result must be byte-identical
/// on both OAuth legs, so both the start and callback handlers call this with
/// the same inputs.
///
/// Precedence: provider override, configured public base URL, then the
/// incoming request's forwarded headers (development fallback, logged).
pub fn resolve_callback_url(
    provider: &str,
    settings: &ProviderSettings,
    server: &ServerConfig,
    headers: &HeaderMap,
) -> Result<String, AuthError> {
    if let Some(uri) = &settings.redirect_uri {
        return Ok(uri.clone());
    }

    if let Some(base) = &server.public_url {
        return Ok(format!(
            "{}/api/auth/{provider}/callback",
            base.trim_end_matches('/')
        ));
    }

    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(axum::http::header::HOST))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AuthError::Internal("Cannot derive callback URL: no Host header".to_string())
        })?;

    tracing::warn!(
        provider,
        "Deriving OAuth callback URL from request headers; set server.public_url or a provider redirect_uri for production"
    );

    Ok(format!("{proto}://{host}/api/auth/{provider}/callback"))
}

// ============================================================================
// Callback outcome
// ============================================================================

/// Terminal state of one callback invocation.
enum CallbackOutcome {
    Success,
    Linked,
    UsernameConflict(String),
    Error(&'static str),
}

impl CallbackOutcome {
    const fn status(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Linked => "linked",
            Self::UsernameConflict(_) => "username_conflict",
            Self::Error(_) => "error",
        }
    }

    /// Frontend redirect carrying `authProvider`, `authStatus` and, where
    /// applicable, `authMessage` (reason code or suggested username).
    fn redirect_url(&self, frontend_url: &str, provider: &str, return_to: Option<&str>) -> String {
        let mut url = format!(
            "{}/?authProvider={}&authStatus={}",
            frontend_url.trim_end_matches('/'),
            urlencoding::encode(provider),
            self.status(),
        );

        match self {
            Self::UsernameConflict(suggested) => {
                url.push_str("&authMessage=");
                url.push_str(&urlencoding::encode(suggested));
            }
            Self::Error(reason) => {
                url.push_str("&authMessage=");
                url.push_str(reason);
            }
            Self::Success | Self::Linked => {}
        }

        if let Some(return_to) = return_to {
            url.push_str("&returnTo=");
            url.push_str(&urlencoding::encode(return_to));
        }

        url
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /auth/{provider}?mode=login|link&returnTo=
/// First OAuth leg: issue the state token and redirect to the provider.
pub async fn start(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<OAuthStartQuery>,
    headers: HeaderMap,
    session: Session,
) -> Result<Redirect, ApiError> {
    let client = state
        .providers()
        .get(&provider)
        .ok_or_else(|| ApiError::ProviderUnavailable(provider.clone()))?;

    let mode = params.mode.unwrap_or(OAuthMode::Login);

    let user = session::current_user(&session)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;

    // Link mode needs an owner before we contact the provider at all.
    if mode == OAuthMode::Link && user.is_none() {
        return Err(ApiError::unauthorized(
            "Linking a provider requires an authenticated session",
        ));
    }

    let config = state.config_snapshot().await;
    let settings = config
        .oauth
        .provider(&provider)
        .ok_or_else(|| ApiError::ProviderUnavailable(provider.clone()))?;

    let redirect_uri = resolve_callback_url(&provider, settings, &config.server, &headers)
        .map_err(ApiError::from)?;

    let state_token = session::begin_callback_wait(
        &session,
        &provider,
        mode,
        user.map(|u| u.user_id),
        params.return_to,
        config.server.session_ttl_minutes,
    )
    .await
    .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;

    Ok(Redirect::temporary(
        &client.authorize_url(&redirect_uri, &state_token),
    ))
}

/// GET /auth/{provider}/callback?code&state
/// Second OAuth leg. Always redirects to the frontend.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<OAuthCallbackQuery>,
    headers: HeaderMap,
    session: Session,
) -> Redirect {
    let config = state.config_snapshot().await;

    let (outcome, return_to) =
        match run_callback(&state, &config, &provider, &params, &headers, &session).await {
            Ok((outcome, return_to)) => (outcome, return_to),
            Err(err) => {
                tracing::error!(provider = %provider, error = %err, "OAuth callback failed");
                (CallbackOutcome::Error(err.reason_code()), None)
            }
        };

    let labels = [
        ("provider", provider.clone()),
        ("status", outcome.status().to_string()),
    ];
    metrics::counter!("auth_callback_total", &labels).increment(1);

    Redirect::temporary(&outcome.redirect_url(
        &config.server.frontend_url,
        &provider,
        return_to.as_deref(),
    ))
}

async fn run_callback(
    state: &Arc<AppState>,
    config: &Config,
    provider: &str,
    params: &OAuthCallbackQuery,
    headers: &HeaderMap,
    session: &Session,
) -> Result<(CallbackOutcome, Option<String>), AuthError> {
    // Consume the stored state before inspecting anything; a replayed or
    // racing callback finds it gone and fails verification.
    let workflow = session::take_workflow(session)
        .await
        .map_err(|e| AuthError::Session(e.to_string()))?;

    let Some(OAuthWorkflow::AwaitingCallback {
        provider: expected_provider,
        state: expected_state,
        mode,
        initiating_user_id,
        return_to,
        ..
    }) = workflow
    else {
        return Err(AuthError::InvalidOAuthState);
    };

    if expected_provider != provider {
        return Err(AuthError::InvalidOAuthState);
    }
    let presented = params.state.as_deref().ok_or(AuthError::InvalidOAuthState)?;
    if presented != expected_state {
        return Err(AuthError::InvalidOAuthState);
    }

    let code = params.code.as_deref().ok_or(AuthError::MissingCode)?;

    let client = state
        .providers()
        .get(provider)
        .ok_or_else(|| AuthError::ProviderNotConfigured(provider.to_string()))?;
    let settings = config
        .oauth
        .provider(provider)
        .ok_or_else(|| AuthError::ProviderNotConfigured(provider.to_string()))?;
    let redirect_uri = resolve_callback_url(provider, settings, &config.server, headers)?;

    let grant = client.exchange_code(code, &redirect_uri).await?;
    let identity = client.fetch_identity(&grant).await?;

    match mode {
        OAuthMode::Link => {
            let user_id = initiating_user_id.ok_or(AuthError::MissingSessionUser)?;
            state
                .identity_service()
                .link_account(user_id, &identity)
                .await?;
            // The session stays bound to the initiating user unchanged.
            Ok((CallbackOutcome::Linked, return_to))
        }
        OAuthMode::Login => match state.identity_service().resolve_login(&identity).await? {
            LoginResolution::SignedIn(user) => {
                session::bind_user(session, &user)
                    .await
                    .map_err(|e| AuthError::Session(e.to_string()))?;
                Ok((CallbackOutcome::Success, return_to))
            }
            LoginResolution::UsernameConflict { base_username } => {
                session::stash_pending_signup(
                    session,
                    &identity,
                    &base_username,
                    return_to.clone(),
                    config.server.session_ttl_minutes,
                )
                .await
                .map_err(|e| AuthError::Session(e.to_string()))?;
                Ok((CallbackOutcome::UsernameConflict(base_username), return_to))
            }
        },
    }
}

/// POST /complete-github-signup and /complete-google-signup
/// Finish a signup deferred on a username collision. The pending identity in
/// the session already names its provider, so both routes share this handler.
pub async fn complete_signup(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<CompleteSignupRequest>,
) -> Result<Json<CompleteSignupResponse>, ApiError> {
    let Some((identity, _base_username, return_to)) = session::peek_pending_signup(&session)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?
    else {
        return Err(ApiError::validation("No signup is pending in this session"));
    };

    // A validation failure propagates here and leaves the pending signup in
    // place so the client can retry with a different name.
    let user = state
        .identity_service()
        .complete_signup(&identity, payload.username.trim())
        .await?;

    session::clear_workflow(&session)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;
    session::bind_user(&session, &user)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;

    Ok(Json(CompleteSignupResponse {
        success: true,
        user: user.into(),
        return_to,
    }))
}

/// GET /auth/providers
/// Linked providers for the current user.
pub async fn linked_providers(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Vec<LinkedProvider>>, ApiError> {
    let user = super::auth::require_user(&session).await?;

    let providers = state
        .identity_service()
        .linked_providers(user.user_id)
        .await?;

    Ok(Json(providers))
}

/// DELETE /auth/providers/{provider}
/// Unlink a provider, refusing to strand the account without any sign-in
/// method.
pub async fn unlink(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    session: Session,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let user = super::auth::require_user(&session).await?;

    state
        .identity_service()
        .unlink(user.user_id, &provider)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse {
        message: format!("Unlinked {provider}"),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(redirect_uri: Option<&str>) -> ProviderSettings {
        ProviderSettings {
            client_id: "abc".to_string(),
            client_secret: "shh".to_string(),
            redirect_uri: redirect_uri.map(str::to_string),
        }
    }

    #[test]
    fn test_callback_url_prefers_provider_override() {
        let mut server = ServerConfig::default();
        server.public_url = Some("https://api.murmur.example".to_string());

        let url = resolve_callback_url(
            "github",
            &settings(Some("https://other.example/cb")),
            &server,
            &HeaderMap::new(),
        )
        .unwrap();

        assert_eq!(url, "https://other.example/cb");
    }

    #[test]
    fn test_callback_url_from_public_base() {
        let mut server = ServerConfig::default();
        server.public_url = Some("https://api.murmur.example/".to_string());

        let url =
            resolve_callback_url("google", &settings(None), &server, &HeaderMap::new()).unwrap();

        assert_eq!(
            url,
            "https://api.murmur.example/api/auth/google/callback"
        );
    }

    #[test]
    fn test_callback_url_header_fallback() {
        let server = ServerConfig::default();

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        headers.insert("x-forwarded-host", "murmur.dev".parse().unwrap());

        let url = resolve_callback_url("github", &settings(None), &server, &headers).unwrap();
        assert_eq!(url, "https://murmur.dev/api/auth/github/callback");

        // Plain Host header, no forwarding.
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::HOST, "localhost:8470".parse().unwrap());
        let url = resolve_callback_url("github", &settings(None), &server, &headers).unwrap();
        assert_eq!(url, "http://localhost:8470/api/auth/github/callback");
    }

    #[test]
    fn test_callback_url_without_any_source_fails() {
        let server = ServerConfig::default();
        let result = resolve_callback_url("github", &settings(None), &server, &HeaderMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_outcome_redirects_carry_status_and_message() {
        let url = CallbackOutcome::Success.redirect_url("http://localhost:5173", "github", None);
        assert_eq!(
            url,
            "http://localhost:5173/?authProvider=github&authStatus=success"
        );

        let url = CallbackOutcome::UsernameConflict("octocat".to_string()).redirect_url(
            "http://localhost:5173/",
            "github",
            Some("/feed"),
        );
        assert!(url.contains("authStatus=username_conflict"));
        assert!(url.contains("authMessage=octocat"));
        assert!(url.contains("returnTo=%2Ffeed"));

        let url = CallbackOutcome::Error("invalid_oauth_state").redirect_url(
            "http://localhost:5173",
            "google",
            None,
        );
        assert!(url.contains("authProvider=google"));
        assert!(url.contains("authStatus=error&authMessage=invalid_oauth_state"));
    }
}
