//! Configuration error types.

use swarm_types::ErrorKind;

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while locating, reading and merging packs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a file from an asset store.
    #[error("failed to read '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("failed to parse YAML config: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    /// Failed to parse the TOML application config.
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Agent, tool, model or asset does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Config is structurally valid YAML but semantically wrong.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Secret lookup failed.
    #[error("secret '{key}' not found for {owner}")]
    SecretNotFound { owner: String, key: String },

    /// Store capability or scheme not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Remote asset store failure.
    #[error("asset request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl ConfigError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn read_file(path: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path.into());
        }
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::NotFound(_) => ErrorKind::NotFound,
            ConfigError::ParseYaml(_) | ConfigError::ParseToml(_) | ConfigError::Invalid(_) => {
                ErrorKind::BadRequest
            }
            ConfigError::SecretNotFound { .. } => ErrorKind::Unauthorized,
            ConfigError::Unsupported(_) => ErrorKind::Unsupported,
            ConfigError::ReadFile { .. } | ConfigError::Http(_) | ConfigError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }
}
