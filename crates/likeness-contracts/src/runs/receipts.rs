use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::artifact::ArtifactRecord;
use crate::drift::{DriftMethod, IdentityVerdict};
use crate::ledger::AttemptLedger;
use crate::prompts::{PromptTierSet, Tier};
use crate::routing::{OperatingMode, ProviderChain};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptRequest {
    pub request_id: String,
    pub prompts: PromptTierSet,
    pub mode: OperatingMode,
    pub provider_override: Option<String>,
    pub reference_image: Option<String>,
    pub size: String,
    pub seed: Option<u64>,
}

/// How the engine satisfied the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptResolution {
    pub chain: ProviderChain,
    pub provider: String,
    pub tier: Tier,
    pub drift_method: DriftMethod,
    pub drift_threshold: f64,
    pub verdict: IdentityVerdict,
}

/// `receipt-<image_id>.json` beside the image.
pub fn receipt_path_for(image_path: &Path, image_id: &str) -> PathBuf {
    let file_name = format!("receipt-{image_id}.json");
    match image_path.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}

pub fn build_receipt(
    request: &ReceiptRequest,
    resolution: &ReceiptResolution,
    ledger: &AttemptLedger,
    record: &ArtifactRecord,
    image_path: &Path,
    receipt_path: &Path,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert("request".to_string(), sanitized(request));
    root.insert("resolved".to_string(), sanitized(resolution));
    root.insert("attempts".to_string(), sanitized(ledger));
    root.insert("drift_score".to_string(), sanitized(&record.drift_score));

    let mut artifacts = Map::new();
    artifacts.insert("image_id".to_string(), Value::String(record.image_id.clone()));
    artifacts.insert("locator".to_string(), Value::String(record.locator.clone()));
    artifacts.insert(
        "image_path".to_string(),
        Value::String(image_path.to_string_lossy().to_string()),
    );
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    root.insert("artifacts".to_string(), Value::Object(artifacts));
    root.insert(
        "result_metadata".to_string(),
        sanitize_payload(&Value::Object(record.metadata.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

fn sanitized<T: Serialize>(value: &T) -> Value {
    sanitize_payload(&serde_json::to_value(value).unwrap_or(Value::Null))
}

/// Replaces inline image payloads and credentials with a placeholder.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "b64_json" | "image" | "image_bytes" | "data" | "api_key" | "authorization"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
