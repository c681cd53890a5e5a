use leaderboard::config::{Config as LeaderboardConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;

pub const TOKEN_ENV: &str = "RAISELY_TOKEN";
pub const WEBHOOK_SECRET_ENV: &str = "WEBHOOK_SECRET";

#[derive(Clone, Debug, Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "MetricsConfig::default_prefix")]
    pub prefix: String,
}

impl MetricsConfig {
    fn default_prefix() -> String {
        "rally".into()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
    /// `EnvFilter` directives used when `RUST_LOG` is not set
    #[serde(default = "LoggingConfig::default_filter")]
    pub filter: String,
}

impl LoggingConfig {
    fn default_filter() -> String {
        "info".into()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            sentry_dsn: None,
            filter: LoggingConfig::default_filter(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub metrics: Option<MetricsConfig>,
    pub leaderboard: LeaderboardConfig,
}

impl Config {
    /// Loads the file and applies secrets from the environment.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let mut config: Config = serde_yaml::from_reader(file)?;
        config.apply_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Secrets usually stay out of the config file; non-empty values found
    /// through `lookup` replace whatever the file says.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value: &String| !value.is_empty());

        if let Some(token) = lookup(TOKEN_ENV) {
            self.leaderboard.raisely.token = token;
        }
        if let Some(secret) = lookup(WEBHOOK_SECRET_ENV) {
            self.leaderboard.webhook.secret = secret;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Ok(self.leaderboard.validate()?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}
