use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::error::ProviderError;
use crate::provider::{
    artifact_from_bytes, download_image, map_object, response_json_or_error, GenerateRequest,
    GeneratedArtifact, ImageProvider, SizeHint,
};

const OPENAI_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiProvider {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http: HttpClient,
}

impl OpenAiProvider {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        let http = HttpClient::builder()
            .timeout(OPENAI_TIMEOUT)
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
            http,
        }
    }

    fn generate_image(&self, request: &GenerateRequest, api_key: &str) -> Result<(Vec<u8>, Value)> {
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = json!({
            "model": self.model,
            "prompt": prompt_with_reference_hint(&request.prompt, request.reference.as_deref()),
            "n": 1,
            "size": normalize_openai_size(request.size),
        });
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        let parsed = response_json_or_error("OpenAI", response)?;
        let bytes = self.extract_first_image(&parsed)?;
        let revised_prompt = parsed
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("revised_prompt"))
            .cloned()
            .unwrap_or(Value::Null);
        Ok((bytes, revised_prompt))
    }

    fn extract_first_image(&self, response_payload: &Value) -> Result<Vec<u8>> {
        let rows = response_payload
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in rows {
            let Some(obj) = row.as_object() else {
                continue;
            };
            if let Some(b64) = obj.get("b64_json").and_then(Value::as_str) {
                return BASE64
                    .decode(b64.as_bytes())
                    .context("OpenAI image base64 decode failed");
            }
            if let Some(url) = obj.get("url").and_then(Value::as_str) {
                return download_image(&self.http, "OpenAI", url);
            }
        }
        bail!("OpenAI response contained no image data")
    }
}

impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn timeout(&self) -> Duration {
        OPENAI_TIMEOUT
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedArtifact, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::misconfigured(
                self.name(),
                "OPENAI_API_KEY not set",
            ));
        };
        let started = Instant::now();
        self.generate_image(request, api_key)
            .and_then(|(bytes, revised_prompt)| {
                let mut extra: Map<String, Value> = map_object(json!({ "model": self.model }));
                if !revised_prompt.is_null() {
                    extra.insert("revised_prompt".to_string(), revised_prompt);
                }
                artifact_from_bytes(self.name(), request, &bytes, started, extra)
            })
            .map_err(|err| ProviderError::from_anyhow(self.name(), &err))
    }
}

/// OpenAI has no reference-image input on this endpoint; the locator is
/// passed as a textual consistency hint instead.
fn prompt_with_reference_hint(prompt: &str, reference: Option<&str>) -> String {
    match reference {
        Some(reference) => format!(
            "{prompt}\n\nKeep the subject's identity consistent with the reference image at {reference}."
        ),
        None => prompt.to_string(),
    }
}

fn normalize_openai_size(size: SizeHint) -> &'static str {
    let ratio = size.width as f64 / size.height.max(1) as f64;
    if ratio > 1.2 {
        "1536x1024"
    } else if ratio < 1.0 / 1.2 {
        "1024x1536"
    } else {
        "1024x1024"
    }
}
