//! Configuration loader with environment variable expansion

use super::{expand_env_vars, Config, ConfigError};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_partial() {
        let config = ConfigLoader::from_yaml("upload:\n  chunk_size: 524288\n").unwrap();
        assert_eq!(config.upload.chunk_size, 524288);
        assert_eq!(config.upload.copy_block_size, 65536);
        assert_eq!(config.transport.timeout_seconds, 60);
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        let result = ConfigLoader::from_yaml("transport:\n  endpoint: ftp://nope\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ConfigLoader::load("/nonexistent/cirrus.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
