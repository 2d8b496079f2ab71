use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Provider used when no default is configured.
pub const LAST_RESORT_PROVIDER: &str = "stub";

/// Retry policy for a router instance.
///
/// `Strict` collapses the chain to a single provider so that no failover call
/// is ever made; `Exploratory` walks the full configured fallback list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Strict,
    Exploratory,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Strict => "strict",
            OperatingMode::Exploratory => "exploratory",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = SettingsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" | "work" => Ok(OperatingMode::Strict),
            "exploratory" | "sandbox" => Ok(OperatingMode::Exploratory),
            _ => Err(SettingsError::UnknownMode(raw.trim().to_string())),
        }
    }
}

/// Ordered, de-duplicated provider names attempted for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProviderChain {
    names: Vec<String>,
}

impl ProviderChain {
    /// Builds the chain for `mode`.
    ///
    /// Strict: exactly one entry, the override when given, else the default.
    /// Exploratory: `[override?, default, ...fallbacks]`, first occurrence wins.
    pub fn build(
        mode: OperatingMode,
        provider_override: Option<&str>,
        default_provider: &str,
        fallbacks: &[String],
    ) -> Self {
        let default_provider = normalize_provider_name(default_provider);
        let default_provider = if default_provider.is_empty() {
            LAST_RESORT_PROVIDER.to_string()
        } else {
            default_provider
        };
        let provider_override = provider_override
            .map(normalize_provider_name)
            .filter(|name| !name.is_empty());

        match mode {
            OperatingMode::Strict => Self {
                names: vec![provider_override.unwrap_or(default_provider)],
            },
            OperatingMode::Exploratory => Self::from_names(
                provider_override
                    .into_iter()
                    .chain(std::iter::once(default_provider))
                    .chain(fallbacks.iter().cloned()),
            ),
        }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique: IndexSet<String> = names
            .into_iter()
            .map(|name| normalize_provider_name(name.as_ref()))
            .filter(|name| !name.is_empty())
            .collect();
        Self {
            names: unique.into_iter().collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        self.names.as_slice()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Display for ProviderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names.join(" -> "))
    }
}

pub fn normalize_provider_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Parses a colon-delimited provider list such as `openai:stability:stub`.
pub fn parse_provider_list(raw: &str) -> Vec<String> {
    raw.split(':')
        .map(normalize_provider_name)
        .filter(|name| !name.is_empty())
        .collect()
}
