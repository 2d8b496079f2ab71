use std::path::PathBuf;

use likeness_contracts::drift::DriftMethod;
use likeness_contracts::ledger::{AttemptErrorKind, AttemptLedger};
use thiserror::Error;

use crate::provider::error_chain_text;

/// Attempt-local failure raised by a provider adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },
    #[error("{provider} failed: {cause}")]
    Failed { provider: String, cause: String },
    #[error("{provider} is misconfigured: {cause}")]
    Misconfigured { provider: String, cause: String },
}

impl ProviderError {
    pub fn failed(provider: &str, cause: impl Into<String>) -> Self {
        ProviderError::Failed {
            provider: provider.to_string(),
            cause: cause.into(),
        }
    }

    pub fn misconfigured(provider: &str, cause: impl Into<String>) -> Self {
        ProviderError::Misconfigured {
            provider: provider.to_string(),
            cause: cause.into(),
        }
    }

    /// Flattens an `anyhow` chain into a `Failed` error.
    pub fn from_anyhow(provider: &str, err: &anyhow::Error) -> Self {
        Self::failed(provider, error_chain_text(err, 512))
    }

    pub fn kind(&self) -> AttemptErrorKind {
        match self {
            ProviderError::Timeout { .. } => AttemptErrorKind::ProviderTimeout,
            ProviderError::Failed { .. } | ProviderError::Misconfigured { .. } => {
                AttemptErrorKind::ProviderError
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown provider '{name}' (available: {})", .available.join(", "))]
    UnknownProvider { name: String, available: Vec<String> },
}

/// Terminal routing outcome; both variants carry every attempt made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("provider chain exhausted after {} attempt(s):\n{}", .ledger.len(), .ledger.summary())]
    ChainExhausted { ledger: AttemptLedger },
    #[error("generation cancelled after {} attempt(s):\n{}", .ledger.len(), .ledger.summary())]
    CancellationRequested { ledger: AttemptLedger },
}

impl RoutingError {
    pub fn ledger(&self) -> &AttemptLedger {
        match self {
            RoutingError::ChainExhausted { ledger } => ledger,
            RoutingError::CancellationRequested { ledger } => ledger,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComparatorError {
    #[error("no reference image supplied")]
    NoReference,
    #[error("drift method '{method}' is unavailable: {reason}")]
    Unavailable { method: DriftMethod, reason: String },
    #[error("cannot read image {}: {cause}", .path.display())]
    Unreadable { path: PathBuf, cause: String },
    #[error("drift method '{method}' produced a non-finite score")]
    Numeric { method: DriftMethod },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("image {image_id} was generated but its receipt could not be written: {cause}")]
    Receipt { image_id: String, cause: String },
}
