use likeness_contracts::drift::{DriftScore, IdentityVerdict};
use likeness_contracts::error::SettingsError;

/// Advisory drift threshold. A breach never fails a generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityLock {
    threshold: f64,
}

impl IdentityLock {
    pub fn new(threshold: f64) -> Result<Self, SettingsError> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(SettingsError::InvalidThreshold(threshold.to_string()));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Breach only on a measured score strictly above the threshold. A
    /// non-finite score is treated as indeterminate.
    pub fn evaluate(&self, drift: DriftScore) -> IdentityVerdict {
        match drift.validated() {
            DriftScore::Measured(drift) if drift > self.threshold => IdentityVerdict::Breach {
                drift,
                threshold: self.threshold,
            },
            DriftScore::Measured(drift) => IdentityVerdict::Pass {
                drift,
                threshold: self.threshold,
            },
            DriftScore::Indeterminate => IdentityVerdict::Unevaluated,
        }
    }
}
