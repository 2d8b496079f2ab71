use std::time::Duration;

use serde::Serialize;

use crate::prompts::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptErrorKind {
    UnknownProvider,
    ProviderTimeout,
    ProviderError,
    Cancelled,
}

impl AttemptErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptErrorKind::UnknownProvider => "unknown_provider",
            AttemptErrorKind::ProviderTimeout => "provider_timeout",
            AttemptErrorKind::ProviderError => "provider_error",
            AttemptErrorKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    pub kind: AttemptErrorKind,
    pub detail: String,
}

/// One provider/tier call made while routing a request.
///
/// `tier` is absent when the provider name could not be resolved and no
/// tier was ever tried against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationAttempt {
    pub provider: String,
    pub tier: Option<Tier>,
    pub latency_ms: u64,
    pub outcome: AttemptOutcome,
    pub error: Option<AttemptFailure>,
}

impl GenerationAttempt {
    pub fn succeeded(provider: impl Into<String>, tier: Tier, latency: Duration) -> Self {
        Self {
            provider: provider.into(),
            tier: Some(tier),
            latency_ms: duration_millis(latency),
            outcome: AttemptOutcome::Ok,
            error: None,
        }
    }

    pub fn failed(
        provider: impl Into<String>,
        tier: Option<Tier>,
        latency: Duration,
        kind: AttemptErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            tier,
            latency_ms: duration_millis(latency),
            outcome: AttemptOutcome::Error,
            error: Some(AttemptFailure {
                kind,
                detail: detail.into(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == AttemptOutcome::Ok
    }
}

/// Request-local, append-only record of every attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AttemptLedger {
    attempts: Vec<GenerationAttempt>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attempt: GenerationAttempt) {
        self.attempts.push(attempt);
    }

    pub fn attempts(&self) -> &[GenerationAttempt] {
        self.attempts.as_slice()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn last(&self) -> Option<&GenerationAttempt> {
        self.attempts.last()
    }

    pub fn failures(&self) -> impl Iterator<Item = &GenerationAttempt> {
        self.attempts.iter().filter(|attempt| !attempt.is_ok())
    }

    /// Distinct provider names in the order they were first tried.
    pub fn providers_tried(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for attempt in &self.attempts {
            if !names.contains(&attempt.provider.as_str()) {
                names.push(attempt.provider.as_str());
            }
        }
        names
    }

    /// One line per attempt: `provider/tier: outcome`.
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return "no attempts were made".to_string();
        }
        self.attempts
            .iter()
            .map(|attempt| {
                let tier = attempt.tier.map(|tier| tier.as_str()).unwrap_or("-");
                match &attempt.error {
                    Some(failure) => format!(
                        "{}/{}: {} ({})",
                        attempt.provider,
                        tier,
                        failure.kind.as_str(),
                        failure.detail
                    ),
                    None => format!("{}/{}: ok in {}ms", attempt.provider, tier, attempt.latency_ms),
                }
            })
            .collect::<Vec<String>>()
            .join("\n")
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{AttemptErrorKind, AttemptLedger, GenerationAttempt};
    use crate::prompts::Tier;

    fn sample_ledger() -> AttemptLedger {
        let mut ledger = AttemptLedger::new();
        ledger.push(GenerationAttempt::failed(
            "ghost",
            None,
            Duration::ZERO,
            AttemptErrorKind::UnknownProvider,
            "unknown provider 'ghost'",
        ));
        ledger.push(GenerationAttempt::failed(
            "comfyui",
            Some(Tier::Primary),
            Duration::from_millis(40),
            AttemptErrorKind::ProviderTimeout,
            "comfyui timed out after 30ms",
        ));
        ledger.push(GenerationAttempt::succeeded(
            "stub",
            Tier::Primary,
            Duration::from_millis(3),
        ));
        ledger
    }

    #[test]
    fn summary_lists_every_attempt() {
        let ledger = sample_ledger();
        assert_eq!(
            ledger.summary(),
            "ghost/-: unknown_provider (unknown provider 'ghost')\n\
             comfyui/primary: provider_timeout (comfyui timed out after 30ms)\n\
             stub/primary: ok in 3ms"
        );
        assert_eq!(ledger.failures().count(), 2);
        assert_eq!(ledger.providers_tried(), vec!["ghost", "comfyui", "stub"]);
    }

    #[test]
    fn ledger_serializes_as_attempt_array() -> anyhow::Result<()> {
        let ledger = sample_ledger();
        let value = serde_json::to_value(&ledger)?;
        assert_eq!(value[0]["tier"], json!(null));
        assert_eq!(value[0]["error"]["kind"], json!("unknown_provider"));
        assert_eq!(value[1]["latency_ms"], json!(40));
        assert_eq!(value[2]["outcome"], json!("ok"));
        assert_eq!(value[2]["tier"], json!("primary"));
        Ok(())
    }
}
