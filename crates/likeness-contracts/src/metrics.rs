use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::artifact::ArtifactRecord;
use crate::ledger::GenerationAttempt;
use crate::observe::ObservabilityEmitter;
use crate::routing::{OperatingMode, ProviderChain};

/// In-process counters, owned by whoever constructs the engine.
#[derive(Debug, Default)]
pub struct ImageMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl ImageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, key: &str, n: u64) {
        if key.trim().is_empty() {
            return;
        }
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(key.to_string()).or_insert(0) += n;
        }
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counters
            .lock()
            .ok()
            .and_then(|counters| counters.get(key).copied())
            .unwrap_or(0)
    }

    /// Sorted copy of every counter.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .lock()
            .map(|counters| counters.clone())
            .unwrap_or_default()
    }
}

impl ObservabilityEmitter for ImageMetrics {
    fn record_attempt(&self, attempt: &GenerationAttempt) {
        let outcome = if attempt.is_ok() { "ok" } else { "fail" };
        self.inc(&format!("image.{outcome}.{}", attempt.provider), 1);
    }

    fn record_routing_policy(&self, mode: OperatingMode, _chain: &ProviderChain) {
        self.inc(&format!("image.routing.{mode}"), 1);
    }

    fn record_breach(&self, _drift: f64, _threshold: f64, _image_id: &str) {
        self.inc("image.drift.detected", 1);
    }

    fn record_drift_unevaluated(&self, _image_id: &str, _reason: &str) {
        self.inc("image.drift.unevaluated", 1);
    }

    fn record_generation(&self, record: &ArtifactRecord) {
        self.inc("images_generated", 1);
        if record.reference_used {
            self.inc("image.ref.used", 1);
        }
    }
}
