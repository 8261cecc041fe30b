use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_sqlx_store::SqliteStore;

use crate::config::Config;
use crate::state::SharedState;

pub mod auth;
mod error;
pub mod oauth;
mod observability;
mod types;

pub use error::ApiError;
pub use types::*;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }

    #[must_use]
    pub fn providers(&self) -> &Arc<crate::clients::ProviderRegistry> {
        &self.shared.providers
    }

    #[must_use]
    pub fn auth_service(&self) -> &Arc<dyn crate::services::AuthService> {
        &self.shared.auth_service
    }

    #[must_use]
    pub fn identity_service(&self) -> &Arc<dyn crate::services::IdentityService> {
        &self.shared.identity_service
    }

    pub async fn config_snapshot(&self) -> Config {
        self.shared.config().await
    }
}

pub async fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    Ok(create_app_state(shared, prometheus_handle).await)
}

/// Build the session store on its own sqlx pool; sessions carry the bound
/// user and any in-flight OAuth workflow, with TTL equal to the cookie
/// lifetime.
async fn build_session_store(database_path: &str) -> anyhow::Result<SqliteStore> {
    let options = sqlx::sqlite::SqliteConnectOptions::from_str(database_path)?
        .create_if_missing(true);
    // A pooled in-memory database is per-connection; keep a single one.
    let max_connections = if database_path.contains(":memory:") { 1 } else { 5 };
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    let store = SqliteStore::new(pool);
    store.migrate().await?;

    Ok(store)
}

pub async fn router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let (cors_origins, secure_cookies, session_db, ttl_minutes) = {
        let config = state.config().read().await;
        (
            config.server.cors_allowed_origins.clone(),
            config.server.secure_cookies,
            config.server.session_database_path.clone(),
            config.server.session_ttl_minutes,
        )
    };

    let session_store = build_session_store(&session_db).await?;
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(secure_cookies)
        // Lax so the cookie rides along on the provider's top-level redirect
        // back to the callback.
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(ttl_minutes)));

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/set-password", post(auth::set_password))
        .route("/auth/providers", get(oauth::linked_providers))
        .route("/auth/providers/{provider}", delete(oauth::unlink))
        .layer(middleware::from_fn(auth::auth_middleware));

    let api_router = Router::new()
        .merge(protected_routes)
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/{provider}", get(oauth::start))
        .route("/auth/{provider}/callback", get(oauth::callback))
        .route("/complete-github-signup", post(oauth::complete_signup))
        .route("/complete-google-signup", post(oauth::complete_signup))
        .route("/system/status", get(observability::system_status))
        .route("/system/metrics", get(observability::get_metrics))
        .layer(session_layer)
        .with_state(state.clone());

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Ok(Router::new()
        .nest("/api", api_router)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::security_headers_middleware))
        .layer(middleware::from_fn(observability::logging_middleware)))
}
