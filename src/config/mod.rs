//! Layered application configuration.
//!
//! Precedence, highest first: `PULSAR_*` environment variables, a config
//! file (`PULSAR_CONFIG_FILE`, or a discovered `config.toml` /
//! `config.yaml` / `config.yml`), then defaults.

use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_JWT_SECRET: &str = "your-secret-key-here-change-in-production";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    /// Redis-protocol key/stream/pubsub server.
    #[serde(alias = "store")]
    Valkey,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,

    pub http_host: String,
    pub http_port: u16,

    pub storage_backend: StorageBackend,

    // Store connection parameters
    pub store_host: String,
    pub store_port: u16,
    pub store_password: String,
    pub store_tls: bool,

    /// Hard cap on retained messages per topic (log trim).
    pub max_messages_per_topic: usize,
    /// TTL in seconds for message streams, enforced by the store.
    pub persistent_tier_retention: u64,
    /// In-memory cache TTL bound in seconds.
    pub hot_tier_retention: u64,

    // Authentication
    pub jwt_secret_key: String,
    pub jwt_algorithm: String,
    pub jwt_expiration_minutes: i64,

    // Optional seed admin created at startup
    pub bootstrap_admin_username: Option<String>,
    pub bootstrap_admin_password: Option<String>,
    pub bootstrap_admin_email: Option<String>,

    // Per-process user cache
    pub user_cache_ttl_seconds: u64,
    pub user_cache_capacity: u64,

    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            app_name: "Pulsar Relay".into(),
            http_host: "0.0.0.0".into(),
            http_port: 8080,
            storage_backend: StorageBackend::Memory,
            store_host: "localhost".into(),
            store_port: 6379,
            store_password: String::new(),
            store_tls: false,
            max_messages_per_topic: 1_000_000,
            persistent_tier_retention: 86_400,
            hot_tier_retention: 600,
            jwt_secret_key: DEFAULT_JWT_SECRET.into(),
            jwt_algorithm: "HS256".into(),
            jwt_expiration_minutes: 60,
            bootstrap_admin_username: None,
            bootstrap_admin_password: None,
            bootstrap_admin_email: None,
            user_cache_ttl_seconds: 60,
            user_cache_capacity: 1000,
            log_level: "info".into(),
        }
    }
}

impl Settings {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn store_url(&self) -> String {
        crate::store::valkey::store_url(
            &self.store_host,
            self.store_port,
            &self.store_password,
            self.store_tls,
        )
    }

    pub fn uses_default_jwt_secret(&self) -> bool {
        self.jwt_secret_key == DEFAULT_JWT_SECRET
    }
}

/// Locate the config file: explicit `PULSAR_CONFIG_FILE` wins, otherwise the
/// first of `config.toml` / `config.yaml` / `config.yml` in the working
/// directory.
fn discover_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PULSAR_CONFIG_FILE") {
        return Some(PathBuf::from(path));
    }
    ["config.toml", "config.yaml", "config.yml"]
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// Load settings with the documented precedence.
pub fn load_settings() -> Result<Settings, config::ConfigError> {
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();
    if let Some(path) = discover_config_file() {
        tracing::info!(path = %path.display(), "Loading configuration file");
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(Environment::with_prefix("PULSAR").try_parsing(true));

    let settings: Settings = builder.build()?.try_deserialize()?;

    if settings.uses_default_jwt_secret() {
        tracing::warn!(
            "Using default JWT secret key! Set PULSAR_JWT_SECRET_KEY in production."
        );
    }

    Ok(settings)
}
