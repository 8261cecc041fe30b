use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clients::ProviderRegistry;
use crate::config::Config;
use crate::db::Store;
use crate::services::{
    AuthService, IdentityService, SeaOrmAuthService, SeaOrmIdentityService,
};

/// Build a shared HTTP client with reasonable defaults for provider calls.
/// One client is reused across all providers to enable connection pooling
/// and avoid socket exhaustion.
fn build_shared_http_client(timeout_seconds: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_seconds))
        .user_agent("Murmur/0.1")
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build shared HTTP client: {e}"))
}

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    /// Built once from the startup config snapshot; provider set and
    /// credentials do not change while the process runs.
    pub providers: Arc<ProviderRegistry>,

    pub auth_service: Arc<dyn AuthService>,

    pub identity_service: Arc<dyn IdentityService>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let http_client = build_shared_http_client(config.oauth.request_timeout_seconds.into())?;

        let providers = Arc::new(ProviderRegistry::from_config(&config.oauth, http_client));
        if providers.names().is_empty() {
            tracing::warn!("No OAuth providers configured; federated sign-in is disabled");
        } else {
            tracing::info!(providers = ?providers.names(), "OAuth providers configured");
        }

        let auth_service = Arc::new(SeaOrmAuthService::new(
            store.clone(),
            config.security.clone(),
        )) as Arc<dyn AuthService + Send + Sync + 'static>;

        let identity_service = Arc::new(SeaOrmIdentityService::new(store.clone()))
            as Arc<dyn IdentityService + Send + Sync + 'static>;

        let config_arc = Arc::new(RwLock::new(config));

        Ok(Self {
            config: config_arc,
            store,
            providers,
            auth_service,
            identity_service,
        })
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }
}
