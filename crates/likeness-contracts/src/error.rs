use thiserror::Error;

/// Rejected prompt tier sets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("primary prompt must not be empty")]
    EmptyPrimary,
}

/// Configuration values that could not be resolved.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("unknown operating mode '{0}' (expected strict|work|exploratory|sandbox)")]
    UnknownMode(String),

    #[error("unknown drift method '{0}' (expected auto|phash|ssim|embedding)")]
    UnknownDriftMethod(String),

    #[error("drift threshold must be a number strictly between 0 and 1, got '{0}'")]
    InvalidThreshold(String),

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}
