use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub booking: BookingRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    /// Postgres URL; when absent the in-memory store is used.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingRules {
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_subscription_throttle_ms")]
    pub subscription_throttle_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_reconcile_interval_seconds")]
    pub reconcile_interval_seconds: u64,
}

fn default_max_commit_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    50
}
fn default_cache_ttl_seconds() -> u64 {
    300
}
fn default_subscription_throttle_ms() -> u64 {
    1000
}
fn default_page_size() -> usize {
    50
}
fn default_reconcile_interval_seconds() -> u64 {
    30
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            max_commit_attempts: default_max_commit_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            subscription_throttle_ms: default_subscription_throttle_ms(),
            page_size: default_page_size(),
            reconcile_interval_seconds: default_reconcile_interval_seconds(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Default to 'development' env
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of HORIZON)
            // Eg.. `HORIZON__SERVER__PORT=8080` would set the server port
            .add_source(config::Environment::with_prefix("HORIZON").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
