use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub oauth: OAuthConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// "development" or "production"; production refuses header-derived
    /// OAuth callback URLs.
    pub env: String,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/murmur.db".to_string(),
            log_level: "info".to_string(),
            env: "development".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    /// Externally reachable base URL of this API, e.g. "https://api.murmur.social".
    /// Used to build OAuth callback URLs when a provider has no explicit
    /// redirect_uri override.
    pub public_url: Option<String>,

    /// Base URL of the web frontend; every OAuth callback ends in a redirect
    /// here carrying the outcome in the query string.
    pub frontend_url: String,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on session cookies.
    /// Default: true for production safety. Set to false for local development without HTTPS.
    pub secure_cookies: bool,

    /// Session store database; sessions and in-flight OAuth workflow state
    /// live here with the same TTL as the cookie.
    pub session_database_path: String,

    /// Session inactivity TTL in minutes (default: 7 days).
    pub session_ttl_minutes: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8470,
            public_url: None,
            frontend_url: "http://localhost:5173".to_string(),
            cors_allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
            secure_cookies: true,
            session_database_path: "sqlite:data/sessions.db".to_string(),
            session_ttl_minutes: 7 * 24 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub github: ProviderSettings,

    pub google: ProviderSettings,

    /// Timeout applied to token-exchange and profile-fetch calls.
    pub request_timeout_seconds: u32,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            github: ProviderSettings::default(),
            google: ProviderSettings::default(),
            request_timeout_seconds: 30,
        }
    }
}

impl OAuthConfig {
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        match name {
            "github" => Some(&self.github),
            "google" => Some(&self.google),
            _ => None,
        }
    }

    /// Client ids and secrets may come from the environment instead of the
    /// config file; env values win.
    pub fn apply_env_overrides(&mut self) {
        for (prefix, settings) in [
            ("GITHUB", &mut self.github),
            ("GOOGLE", &mut self.google),
        ] {
            if let Ok(value) = std::env::var(format!("{prefix}_CLIENT_ID")) {
                settings.client_id = value;
            }
            if let Ok(value) = std::env::var(format!("{prefix}_CLIENT_SECRET")) {
                settings.client_secret = value;
            }
            if let Ok(value) = std::env::var(format!("{prefix}_REDIRECT_URI")) {
                settings.redirect_uri = Some(value);
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub client_id: String,

    /// Never serialized back into config files written by `save`.
    #[serde(skip_serializing)]
    pub client_secret: String,

    /// Explicit callback URL override; takes precedence over any value
    /// computed from `server.public_url`.
    pub redirect_uri: Option<String>,
}

impl ProviderSettings {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 8192 = 8MB)
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations) - higher = more CPU work
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "murmur".to_string());

        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            oauth: OAuthConfig::default(),
            security: SecurityConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        let mut config = Self::default();
        config.oauth.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.oauth.apply_env_overrides();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("murmur").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".murmur").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.frontend_url.is_empty() {
            anyhow::bail!("server.frontend_url cannot be empty");
        }

        if self.server.session_ttl_minutes <= 0 {
            anyhow::bail!("server.session_ttl_minutes must be > 0");
        }

        if self.is_production() {
            for (name, settings) in [("github", &self.oauth.github), ("google", &self.oauth.google)]
            {
                if settings.is_configured()
                    && settings.redirect_uri.is_none()
                    && self.server.public_url.is_none()
                {
                    anyhow::bail!(
                        "OAuth provider '{name}' is configured but neither oauth.{name}.redirect_uri \
                         nor server.public_url is set; refusing to derive callback URLs from \
                         request headers in production"
                    );
                }
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.general.env == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8470);
        assert_eq!(config.server.session_ttl_minutes, 7 * 24 * 60);
        assert_eq!(config.oauth.request_timeout_seconds, 30);
        assert!(!config.oauth.github.is_configured());
        assert_eq!(config.security.argon2_time_cost, 3);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[oauth.github]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [server]
            frontend_url = "https://murmur.example"

            [oauth.github]
            client_id = "abc"
            client_secret = "shh"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.server.frontend_url, "https://murmur.example");
        assert!(config.oauth.github.is_configured());
        assert!(!config.oauth.google.is_configured());

        assert_eq!(config.server.port, 8470);
    }

    #[test]
    fn test_secret_never_serialized() {
        let mut config = Config::default();
        config.oauth.github.client_secret = "shh".to_string();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(!toml_str.contains("shh"));
    }

    #[test]
    fn test_production_requires_callback_base() {
        let mut config = Config::default();
        config.general.env = "production".to_string();
        config.oauth.github.client_id = "abc".to_string();
        assert!(config.validate().is_err());

        config.server.public_url = Some("https://api.murmur.example".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_lookup() {
        let config = Config::default();
        assert!(config.oauth.provider("github").is_some());
        assert!(config.oauth.provider("google").is_some());
        assert!(config.oauth.provider("gitlab").is_none());
    }
}
