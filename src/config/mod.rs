//! Configuration module for Cirrus Upload
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let full_match = cap.get(0).unwrap();
        let var_name = cap.get(1).unwrap().as_str();

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default, keep the placeholder
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Whether `s` still holds a `${VAR}` placeholder after expansion
fn has_placeholder(s: &str) -> bool {
    let re = regex_lite::Regex::new(r"\$\{[A-Z_][A-Z0-9_]*\}").unwrap();
    re.is_match(s)
}

/// Deserialize an optional secret, expanding environment variables.
/// An empty value (e.g. from `${VAR:-}`) reads as `None`.
fn deserialize_optional_with_env<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.map(|s| expand_env_vars(&s)).filter(|s| !s.is_empty()))
}

/// Deserialize a string, expanding environment variables
fn deserialize_with_env<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_vars(&s))
}

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.transport.endpoint) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid endpoint '{}': must start with http:// or https://",
                self.transport.endpoint
            )));
        }

        if let Some(token) = &self.transport.bearer_token {
            if has_placeholder(token) {
                return Err(ConfigError::ValidationError(
                    "bearer_token references an unset environment variable".into(),
                ));
            }
        }

        if self.transport.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.upload.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "chunk_size must be greater than zero".into(),
            ));
        }

        if self.upload.copy_block_size == 0 {
            return Err(ConfigError::ValidationError(
                "copy_block_size must be greater than zero".into(),
            ));
        }

        let retry = &self.retry;
        if retry.min_attempts == 0 || retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "Retry attempts must be at least 1".into(),
            ));
        }

        if retry.min_attempts > retry.max_attempts {
            return Err(ConfigError::ValidationError(format!(
                "min_attempts ({}) exceeds max_attempts ({})",
                retry.min_attempts, retry.max_attempts
            )));
        }

        if retry.backoff_factor < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid backoff_factor {}: must be at least 1.0",
                retry.backoff_factor
            )));
        }

        if retry.initial_delay_millis > retry.max_delay_millis {
            return Err(ConfigError::ValidationError(
                "initial_delay_millis exceeds max_delay_millis".into(),
            ));
        }

        Ok(())
    }
}

/// Upload endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the storage API. Supports ${VAR} expansion.
    #[serde(
        default = "default_endpoint",
        deserialize_with = "deserialize_with_env"
    )]
    pub endpoint: String,

    /// OAuth2 access token sent as `Authorization: Bearer`. Supports ${VAR}
    /// expansion; an unset variable without a default is a validation error.
    #[serde(default, deserialize_with = "deserialize_optional_with_env")]
    pub bearer_token: Option<String>,

    /// Per-request timeout in seconds. Default: 60
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            bearer_token: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_timeout_seconds() -> u64 {
    60
}

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Flush threshold, rounded to the transport's minimum chunk size
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Read size used when streaming a source into a channel
    #[serde(default = "default_copy_block_size")]
    pub copy_block_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            copy_block_size: default_copy_block_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    crate::channel::DEFAULT_CHUNK_SIZE
}

fn default_copy_block_size() -> usize {
    65536 // 64KB
}

/// Retry configuration
///
/// # Example
///
/// ```yaml
/// retry:
///   min_attempts: 3
///   max_attempts: 6
///   initial_delay_millis: 1000
///   max_delay_millis: 32000
///   backoff_factor: 2.0
///   total_timeout_millis: 50000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_min_attempts")]
    pub min_attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_millis: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_millis: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_total_timeout")]
    pub total_timeout_millis: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_attempts: default_min_attempts(),
            max_attempts: default_max_attempts(),
            initial_delay_millis: default_initial_delay(),
            max_delay_millis: default_max_delay(),
            backoff_factor: default_backoff_factor(),
            total_timeout_millis: default_total_timeout(),
        }
    }
}

fn default_min_attempts() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    6
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    32000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_total_timeout() -> u64 {
    50000
}
