//! Observability configuration.
//!
//! Settings are read once, when the observability context is built, from the
//! process environment (with `.env` support), a lookup closure or a JSON file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const ENV_PROVIDER: &str = "TRACING_PROVIDER";
pub const ENV_PUBLIC_KEY: &str = "LANGFUSE_PUBLIC_KEY";
pub const ENV_SECRET_KEY: &str = "LANGFUSE_SECRET_KEY";
pub const ENV_HOST: &str = "LANGFUSE_HOST";
pub const ENV_QUEUE_CAPACITY: &str = "TRACING_QUEUE_CAPACITY";
pub const ENV_BATCH_SIZE: &str = "TRACING_BATCH_SIZE";
pub const ENV_FLUSH_INTERVAL_MS: &str = "TRACING_FLUSH_INTERVAL_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "TRACING_REQUEST_TIMEOUT_MS";
pub const ENV_FLUSH_TIMEOUT_MS: &str = "TRACING_FLUSH_TIMEOUT_MS";

pub const DEFAULT_HOST: &str = "https://cloud.langfuse.com";
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Missing tracing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Which tracer implementation the observability context builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    #[default]
    Langfuse,
    Noop,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Langfuse => "langfuse",
            Provider::Noop => "noop",
        }
    }

    /// Case-insensitive. Anything unrecognised selects [`Provider::Noop`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "langfuse" => Provider::Langfuse,
            "noop" | "" => Provider::Noop,
            other => {
                tracing::warn!(provider = %other, "unknown tracing provider, using noop");
                Provider::Noop
            }
        }
    }
}

impl From<String> for Provider {
    fn from(s: String) -> Self {
        Provider::parse(&s)
    }
}

impl From<Provider> for String {
    fn from(provider: Provider) -> Self {
        provider.as_str().to_string()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Validated basic-auth credentials plus the backend base URL.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub public_key: String,
    pub secret_key: String,
    pub host: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .field("host", &self.host)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub provider: Provider,
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub host: String,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub flush_timeout_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            public_key: None,
            secret_key: None,
            host: DEFAULT_HOST.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
        }
    }
}

impl fmt::Debug for ObservabilityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservabilityConfig")
            .field("provider", &self.provider)
            .field("public_key", &self.public_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("queue_capacity", &self.queue_capacity)
            .field("batch_size", &self.batch_size)
            .field("flush_interval_ms", &self.flush_interval_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("flush_timeout_ms", &self.flush_timeout_ms)
            .finish()
    }
}

impl ObservabilityConfig {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Blank values count as unset.
    ///
    /// Malformed or zero tuning values are logged and replaced by their
    /// defaults; missing credentials surface later, from
    /// [`ObservabilityConfig::credentials`].
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            provider: get(ENV_PROVIDER)
                .map(|p| Provider::parse(&p))
                .unwrap_or_default(),
            public_key: get(ENV_PUBLIC_KEY),
            secret_key: get(ENV_SECRET_KEY),
            host: get(ENV_HOST).unwrap_or(defaults.host),
            queue_capacity: parse_or(ENV_QUEUE_CAPACITY, get(ENV_QUEUE_CAPACITY), defaults.queue_capacity),
            batch_size: parse_or(ENV_BATCH_SIZE, get(ENV_BATCH_SIZE), defaults.batch_size),
            flush_interval_ms: parse_or(ENV_FLUSH_INTERVAL_MS, get(ENV_FLUSH_INTERVAL_MS), defaults.flush_interval_ms),
            request_timeout_ms: parse_or(ENV_REQUEST_TIMEOUT_MS, get(ENV_REQUEST_TIMEOUT_MS), defaults.request_timeout_ms),
            flush_timeout_ms: parse_or(ENV_FLUSH_TIMEOUT_MS, get(ENV_FLUSH_TIMEOUT_MS), defaults.flush_timeout_ms),
        };
        config.normalized()
    }

    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config.normalized())
    }

    fn normalized(mut self) -> Self {
        self.host = self.host.trim().trim_end_matches('/').to_string();
        if self.host.is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
        let defaults = Self::default();
        self.queue_capacity = nonzero_or(ENV_QUEUE_CAPACITY, self.queue_capacity, defaults.queue_capacity);
        self.batch_size = nonzero_or(ENV_BATCH_SIZE, self.batch_size, defaults.batch_size);
        self.flush_interval_ms = nonzero_or(ENV_FLUSH_INTERVAL_MS, self.flush_interval_ms, defaults.flush_interval_ms);
        self
    }

    /// Rejects settings the delivery pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_QUEUE_CAPACITY,
                value: "0".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_BATCH_SIZE,
                value: "0".to_string(),
            });
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_FLUSH_INTERVAL_MS,
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Credentials required by the `langfuse` provider.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let missing: Vec<&str> = [
            (ENV_PUBLIC_KEY, &self.public_key),
            (ENV_SECRET_KEY, &self.secret_key),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
        .map(|(key, _)| key)
        .collect();

        match (&self.public_key, &self.secret_key) {
            (Some(public_key), Some(secret_key)) if missing.is_empty() => Ok(Credentials {
                public_key: public_key.clone(),
                secret_key: secret_key.clone(),
                host: self.host.clone(),
            }),
            _ => Err(ConfigError::MissingCredentials(missing.join(", "))),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + fmt::Display,
{
    let Some(value) = raw else {
        return default;
    };
    match value.trim().parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            tracing::warn!(key, value = %value, default = %default, "invalid tracing setting, using default");
            default
        }
    }
}

fn nonzero_or<T>(key: &'static str, value: T, default: T) -> T
where
    T: Default + PartialEq + fmt::Display,
{
    if value == T::default() {
        tracing::warn!(key, default = %default, "tracing setting must be non-zero, using default");
        return default;
    }
    value
}
