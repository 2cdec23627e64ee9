use boundary_core::{BoundaryError, ConfigError, ValidationError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(ConfigError),

    #[error("{0}")]
    QueueFull(BoundaryError),

    #[error("{0}")]
    Resolution(BoundaryError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<BoundaryError> for CliError {
    fn from(error: BoundaryError) -> Self {
        match error {
            BoundaryError::Validation(error) => Self::Validation(error),
            error @ BoundaryError::QueueFull { .. } => Self::QueueFull(error),
            error => Self::Resolution(error),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::Io(error) => Self::Io(error),
            error => Self::Config(error),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 2,
            Self::Resolution(_) => 3,
            Self::Serialization(_) => 4,
            Self::QueueFull(_) => 5,
            Self::Io(_) => 10,
        }
    }
}
