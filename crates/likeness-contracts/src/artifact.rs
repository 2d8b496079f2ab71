use serde::Serialize;
use serde_json::{Map, Value};

use crate::drift::DriftScore;
use crate::prompts::Tier;

/// Provenance of one successfully generated image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRecord {
    pub image_id: String,
    pub locator: String,
    pub provider: String,
    pub tier: Tier,
    pub reference_used: bool,
    pub drift_score: DriftScore,
    pub latency_ms: u64,
    pub metadata: Map<String, Value>,
}
