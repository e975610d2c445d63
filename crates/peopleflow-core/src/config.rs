use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub reconciler: ReconcilerConfig,
    pub tenancy: TenancyConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("PEOPLEFLOW")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("reconciler.interval_seconds", 300)?
            .set_default("reconciler.default_retention_days", 30)?
            .set_default("tenancy.default_grace_period_days", 30)?
            .set_default("tenancy.default_trial_days", 14)?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("PEOPLEFLOW").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Seconds between reconciliation ticks
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Retention window applied when the loop auto-cancels a tenant
    #[serde(default = "default_retention_days")]
    pub default_retention_days: u32,
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            default_retention_days: default_retention_days(),
        }
    }
}

fn default_interval_seconds() -> u64 {
    300
}

fn default_retention_days() -> u32 {
    30
}

/// Tenancy defaults
#[derive(Debug, Clone, Deserialize)]
pub struct TenancyConfig {
    #[serde(default = "default_grace_period_days")]
    pub default_grace_period_days: u32,
    #[serde(default = "default_trial_days")]
    pub default_trial_days: u32,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            default_grace_period_days: default_grace_period_days(),
            default_trial_days: default_trial_days(),
        }
    }
}

fn default_grace_period_days() -> u32 {
    30
}

fn default_trial_days() -> u32 {
    14
}
