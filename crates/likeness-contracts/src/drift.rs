use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::SettingsError;

/// Normalized dissimilarity between a candidate and a reference image.
///
/// `Measured` values are always finite and inside `[0, 1]`
/// (0 = identical). `Indeterminate` means no comparison could be made and is
/// never coerced to either end of the range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftScore {
    Measured(f64),
    Indeterminate,
}

impl DriftScore {
    /// Clamps `value` into range. Returns `None` for NaN or infinities.
    pub fn measured(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Some(DriftScore::Measured(value.clamp(0.0, 1.0)))
    }

    /// Re-applies the `Measured` invariant to a score built elsewhere.
    pub fn validated(self) -> Self {
        match self {
            DriftScore::Measured(value) => {
                DriftScore::measured(value).unwrap_or(DriftScore::Indeterminate)
            }
            DriftScore::Indeterminate => DriftScore::Indeterminate,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            DriftScore::Measured(value) => Some(*value),
            DriftScore::Indeterminate => None,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, DriftScore::Indeterminate)
    }
}

impl Serialize for DriftScore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DriftScore::Measured(value) => serializer.serialize_f64(*value),
            DriftScore::Indeterminate => serializer.serialize_none(),
        }
    }
}

/// Comparison algorithm requested from the comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftMethod {
    /// pHash, then SSIM, then embedding; first number wins.
    Auto,
    Phash,
    Ssim,
    Embedding,
}

impl DriftMethod {
    pub const CASCADE: [DriftMethod; 3] =
        [DriftMethod::Phash, DriftMethod::Ssim, DriftMethod::Embedding];

    pub fn as_str(&self) -> &'static str {
        match self {
            DriftMethod::Auto => "auto",
            DriftMethod::Phash => "phash",
            DriftMethod::Ssim => "ssim",
            DriftMethod::Embedding => "embedding",
        }
    }
}

impl fmt::Display for DriftMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriftMethod {
    type Err = SettingsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(DriftMethod::Auto),
            "phash" => Ok(DriftMethod::Phash),
            "ssim" => Ok(DriftMethod::Ssim),
            "embedding" | "clip" => Ok(DriftMethod::Embedding),
            _ => Err(SettingsError::UnknownDriftMethod(raw.trim().to_string())),
        }
    }
}

/// Identity-lock decision for one generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum IdentityVerdict {
    Pass { drift: f64, threshold: f64 },
    Breach { drift: f64, threshold: f64 },
    /// No numeric drift was available, so no decision was made.
    Unevaluated,
}

impl IdentityVerdict {
    pub fn is_breach(&self) -> bool {
        matches!(self, IdentityVerdict::Breach { .. })
    }
}
