use marketlens_core::GovernorError;
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Governor(#[from] GovernorError),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("{failed} of {total} wallets failed")]
    PartialFailure { failed: usize, total: usize },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Argument(_) => 2,
            Self::Governor(GovernorError::InvalidQuery { .. } | GovernorError::Config { .. }) => 2,
            Self::Governor(GovernorError::ThrottledExceeded { .. }) => 7,
            Self::Governor(_) => 3,
            Self::PartialFailure { .. } => 5,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
