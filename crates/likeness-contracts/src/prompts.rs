use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::PromptError;

/// Prompt variant tried against a single provider, in `Tier::ORDER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Primary,
    Recovery,
    Fallback,
}

impl Tier {
    pub const ORDER: [Tier; 3] = [Tier::Primary, Tier::Recovery, Tier::Fallback];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Primary => "primary",
            Tier::Recovery => "recovery",
            Tier::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request prompt variants.
///
/// The primary prompt is mandatory. Recovery and fallback fall back to the
/// primary text when they are unset or blank, so every set always carries
/// all three tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptTierSet {
    tiers: IndexMap<Tier, String>,
}

impl PromptTierSet {
    pub fn new(
        primary: impl Into<String>,
        recovery: Option<String>,
        fallback: Option<String>,
    ) -> Result<Self, PromptError> {
        let primary = primary.into().trim().to_string();
        if primary.is_empty() {
            return Err(PromptError::EmptyPrimary);
        }
        let or_primary = |value: Option<String>| {
            value
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| primary.clone())
        };

        let recovery = or_primary(recovery);
        let fallback = or_primary(fallback);

        let mut tiers = IndexMap::new();
        tiers.insert(Tier::Primary, primary);
        tiers.insert(Tier::Recovery, recovery);
        tiers.insert(Tier::Fallback, fallback);
        Ok(Self { tiers })
    }

    pub fn primary_only(primary: impl Into<String>) -> Result<Self, PromptError> {
        Self::new(primary, None, None)
    }

    pub fn get(&self, tier: Tier) -> &str {
        self.tiers.get(&tier).map(String::as_str).unwrap_or_default()
    }

    pub fn primary(&self) -> &str {
        self.get(Tier::Primary)
    }

    /// Tiers in routing order.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &str)> {
        self.tiers.iter().map(|(tier, text)| (*tier, text.as_str()))
    }
}
