use person_api::CredentialSlot;
use person_store::EncryptionContext;
use person_store::config::DatabaseConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::path::Path;

/// Used when no encryption key is configured. Only suitable for development.
pub const DEFAULT_ENCRYPTION_KEY: &str = "default-key-for-dev";

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug)]
pub struct LoggingConfig {
    #[serde(default)]
    pub sentry_dsn: Option<String>,
    /// Default filter directive when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Debug, Default)]
pub struct CommonConfig {
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

/// Network listener configuration
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort("0".to_string()));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Symmetric key for attribute values and audit bodies.
    pub key: Option<String>,
    /// Stamped next to every value written with `key`.
    pub key_version: i32,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        EncryptionConfig {
            key: None,
            key_version: 1,
        }
    }
}

impl EncryptionConfig {
    pub fn is_default_key(&self) -> bool {
        self.key.is_none()
    }

    pub fn context(&self) -> EncryptionContext {
        EncryptionContext::new(
            self.key.as_deref().unwrap_or(DEFAULT_ENCRYPTION_KEY),
            self.key_version,
        )
    }
}

fn default_api_keys() -> Vec<CredentialSlot> {
    vec![
        CredentialSlot::new("blue", None),
        CredentialSlot::new("green", None),
    ]
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Named API key slots for the `/persons` routes. Each slot can also be
    /// set through `PERSON_API_KEY_<NAME>`.
    #[serde(default = "default_api_keys")]
    pub api_keys: Vec<CredentialSlot>,
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            common: CommonConfig::default(),
            listener: Listener::default(),
            database: DatabaseConfig::default(),
            api_keys: default_api_keys(),
            encryption: EncryptionConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Reads the file if one is given, applies environment overrides from
    /// `env` and validates the result.
    pub fn load<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables win over the file. Empty values are ignored.
    pub fn apply_env<F>(&mut self, env: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| env(name).filter(|value| !value.is_empty());

        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }

        if let Some(port) = lookup("PORT") {
            self.listener.port = port
                .parse()
                .map_err(|_| ValidationError::InvalidPort(port.clone()))?;
        }

        for slot in &mut self.api_keys {
            let var = format!("PERSON_API_KEY_{}", slot.name.to_uppercase());
            if let Some(key) = lookup(&var) {
                slot.key = Some(key);
            }
        }

        let var = format!("ENCRYPTION_KEY_{}", self.encryption.key_version);
        if let Some(key) = lookup(&var) {
            self.encryption.key = Some(key);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if self.database.url.is_empty() {
            return Err(ValidationError::DatabaseUrlNotSet);
        }

        let mut names = HashSet::new();
        for slot in &self.api_keys {
            if slot.name.is_empty() {
                return Err(ValidationError::EmptyKeySlotName);
            }
            if !names.insert(slot.name.as_str()) {
                return Err(ValidationError::DuplicateKeySlot(slot.name.clone()));
            }
        }

        if self.encryption.key_version < 1 {
            return Err(ValidationError::InvalidKeyVersion(
                self.encryption.key_version,
            ));
        }

        if self.encryption.key.as_deref() == Some("") {
            return Err(ValidationError::EmptyEncryptionKey);
        }

        Ok(())
    }

    /// Printable overview without credentials.
    pub fn summary(&self) -> ConfigSummary<'_> {
        ConfigSummary(self)
    }
}

pub struct ConfigSummary<'a>(&'a Config);

impl fmt::Display for ConfigSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.0;
        writeln!(f, "listener: {}", config.listener.address())?;
        writeln!(
            f,
            "database: pool {}..{} connections, migrations {}",
            config.database.min_connections,
            config.database.max_connections,
            if config.database.run_migrations { "on" } else { "off" },
        )?;
        for slot in &config.api_keys {
            let state = if slot.is_active() {
                "active"
            } else if slot.key.is_some() {
                "malformed"
            } else {
                "unset"
            };
            writeln!(f, "api key {}: {state}", slot.name)?;
        }
        writeln!(
            f,
            "encryption: key version {}{}",
            config.encryption.key_version,
            if config.encryption.is_default_key() {
                " (development default key)"
            } else {
                ""
            },
        )?;
        match &config.common.metrics {
            Some(metrics) => writeln!(f, "metrics: statsd {}:{}", metrics.statsd_host, metrics.statsd_port)?,
            None => writeln!(f, "metrics: disabled")?,
        }
        let sentry = config
            .common
            .logging
            .as_ref()
            .and_then(|logging| logging.sentry_dsn.as_ref())
            .is_some();
        write!(f, "sentry: {}", if sentry { "enabled" } else { "disabled" })
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

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("DATABASE_URL is not set")]
    DatabaseUrlNotSet,

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("empty api key slot name")]
    EmptyKeySlotName,

    #[error("duplicate api key slot: {0}")]
    DuplicateKeySlot(String),

    #[error("encryption key version must be positive, got {0}")]
    InvalidKeyVersion(i32),

    #[error("encryption key is empty")]
    EmptyEncryptionKey,
}
