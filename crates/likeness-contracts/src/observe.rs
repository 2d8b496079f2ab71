use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::artifact::ArtifactRecord;
use crate::events::{EventPayload, EventWriter};
use crate::ledger::GenerationAttempt;
use crate::routing::{OperatingMode, ProviderChain};

/// Sink for routing and identity-lock observations.
///
/// Every call is best effort: implementations swallow their own failures and
/// must never influence the generation result.
pub trait ObservabilityEmitter: Send + Sync {
    fn record_attempt(&self, attempt: &GenerationAttempt);
    fn record_routing_policy(&self, mode: OperatingMode, chain: &ProviderChain);
    fn record_breach(&self, drift: f64, threshold: f64, image_id: &str);
    fn record_drift_unevaluated(&self, image_id: &str, reason: &str);
    fn record_generation(&self, record: &ArtifactRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmitter;

impl ObservabilityEmitter for NoopEmitter {
    fn record_attempt(&self, _attempt: &GenerationAttempt) {}
    fn record_routing_policy(&self, _mode: OperatingMode, _chain: &ProviderChain) {}
    fn record_breach(&self, _drift: f64, _threshold: f64, _image_id: &str) {}
    fn record_drift_unevaluated(&self, _image_id: &str, _reason: &str) {}
    fn record_generation(&self, _record: &ArtifactRecord) {}
}

/// Writes observations as JSONL events.
#[derive(Debug, Clone)]
pub struct EventLogEmitter {
    events: EventWriter,
}

impl EventLogEmitter {
    pub fn new(events: EventWriter) -> Self {
        Self { events }
    }

    pub fn event_writer(&self) -> &EventWriter {
        &self.events
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let payload: EventPayload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("likeness: dropped '{event_type}' event: {err:#}");
        }
    }
}

impl ObservabilityEmitter for EventLogEmitter {
    fn record_attempt(&self, attempt: &GenerationAttempt) {
        let event_type = if attempt.is_ok() {
            "image.attempt.ok"
        } else {
            "image.attempt.fail"
        };
        self.emit(
            event_type,
            json!({
                "provider": attempt.provider,
                "tier": attempt.tier,
                "latency_ms": attempt.latency_ms,
                "outcome": attempt.outcome,
                "error": attempt.error,
            }),
        );
    }

    fn record_routing_policy(&self, mode: OperatingMode, chain: &ProviderChain) {
        self.emit(
            "image.routing.policy",
            json!({
                "mode": mode,
                "chain": chain,
                "failover": chain.len() > 1,
            }),
        );
    }

    fn record_breach(&self, drift: f64, threshold: f64, image_id: &str) {
        self.emit(
            "image.drift.breach",
            json!({
                "image_id": image_id,
                "drift_score": drift,
                "threshold": threshold,
                "reason": "drift_threshold_breached",
            }),
        );
    }

    fn record_drift_unevaluated(&self, image_id: &str, reason: &str) {
        self.emit(
            "image.drift.unevaluated",
            json!({
                "image_id": image_id,
                "reason": reason,
            }),
        );
    }

    fn record_generation(&self, record: &ArtifactRecord) {
        let mut payload = Map::new();
        payload.insert("image_id".to_string(), json!(record.image_id));
        payload.insert("url".to_string(), json!(record.locator));
        payload.insert("provider".to_string(), json!(record.provider));
        payload.insert("tier".to_string(), json!(record.tier));
        payload.insert("ref_used".to_string(), json!(record.reference_used));
        payload.insert("drift_score".to_string(), json!(record.drift_score));
        payload.insert("latency_ms".to_string(), json!(record.latency_ms));
        self.emit("image.generate.ok", Value::Object(payload));
    }
}

/// Forwards every observation to each inner emitter in order.
#[derive(Clone, Default)]
pub struct FanoutEmitter {
    sinks: Vec<Arc<dyn ObservabilityEmitter>>,
}

impl FanoutEmitter {
    pub fn new(sinks: Vec<Arc<dyn ObservabilityEmitter>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn ObservabilityEmitter>) {
        self.sinks.push(sink);
    }
}

impl ObservabilityEmitter for FanoutEmitter {
    fn record_attempt(&self, attempt: &GenerationAttempt) {
        for sink in &self.sinks {
            sink.record_attempt(attempt);
        }
    }

    fn record_routing_policy(&self, mode: OperatingMode, chain: &ProviderChain) {
        for sink in &self.sinks {
            sink.record_routing_policy(mode, chain);
        }
    }

    fn record_breach(&self, drift: f64, threshold: f64, image_id: &str) {
        for sink in &self.sinks {
            sink.record_breach(drift, threshold, image_id);
        }
    }

    fn record_drift_unevaluated(&self, image_id: &str, reason: &str) {
        for sink in &self.sinks {
            sink.record_drift_unevaluated(image_id, reason);
        }
    }

    fn record_generation(&self, record: &ArtifactRecord) {
        for sink in &self.sinks {
            sink.record_generation(record);
        }
    }
}
