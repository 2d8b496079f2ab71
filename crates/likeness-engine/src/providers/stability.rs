use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::multipart::Form as MultipartForm;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::provider::{
    artifact_from_bytes, map_object, truncate_text, GenerateRequest, GeneratedArtifact,
    ImageProvider, SizeHint,
};

const STABILITY_TIMEOUT: Duration = Duration::from_secs(120);

pub struct StabilityProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl StabilityProvider {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        let http = HttpClient::builder()
            .timeout(STABILITY_TIMEOUT)
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            http,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v2beta/stable-image/generate/core", self.api_base)
    }

    fn aspect_ratio_from_size(size: SizeHint) -> &'static str {
        let ratio = size.width as f64 / size.height.max(1) as f64;
        let candidates = [
            ("1:1", 1.0),
            ("16:9", 16.0 / 9.0),
            ("9:16", 9.0 / 16.0),
            ("3:2", 3.0 / 2.0),
            ("2:3", 2.0 / 3.0),
            ("4:5", 4.0 / 5.0),
            ("5:4", 5.0 / 4.0),
        ];
        let mut best = "1:1";
        let mut best_delta = f64::MAX;
        for (name, value) in candidates {
            let delta = (ratio - value).abs();
            if delta < best_delta {
                best_delta = delta;
                best = name;
            }
        }
        best
    }

    fn decode_json_image(payload: &Value) -> Result<Vec<u8>> {
        let image_b64 = payload
            .get("image")
            .or_else(|| payload.get("base64"))
            .or_else(|| {
                payload
                    .get("artifacts")
                    .and_then(Value::as_array)
                    .and_then(|rows| rows.first())
                    .and_then(Value::as_object)
                    .and_then(|row| row.get("base64"))
            })
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Stability JSON response missing image bytes"))?;
        BASE64
            .decode(image_b64.as_bytes())
            .context("Stability image base64 decode failed")
    }

    fn call(&self, request: &GenerateRequest, api_key: &str) -> Result<Vec<u8>> {
        let endpoint = self.endpoint();
        let mut form = MultipartForm::new()
            .text("prompt", request.prompt.clone())
            .text("aspect_ratio", Self::aspect_ratio_from_size(request.size))
            .text("output_format", "png");
        if let Some(seed) = request.seed {
            form = form.text("seed", seed.to_string());
        }

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .header("Accept", "image/*")
            .multipart(form)
            .send()
            .with_context(|| format!("Stability request failed ({endpoint})"))?;
        let status_code = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "Stability request failed ({status_code}): {}",
                truncate_text(&body, 512)
            );
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();
        if content_type.starts_with("image/") {
            return Ok(response
                .bytes()
                .context("failed reading Stability image bytes")?
                .to_vec());
        }
        let payload: Value = response
            .json()
            .context("failed parsing Stability JSON response")?;
        Self::decode_json_image(&payload)
    }
}

impl ImageProvider for StabilityProvider {
    fn name(&self) -> &str {
        "stability"
    }

    fn timeout(&self) -> Duration {
        STABILITY_TIMEOUT
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedArtifact, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::misconfigured(
                self.name(),
                "STABILITY_API_KEY not set",
            ));
        };
        let started = Instant::now();
        self.call(request, api_key)
            .and_then(|bytes| {
                let extra = map_object(json!({
                    "aspect_ratio": Self::aspect_ratio_from_size(request.size),
                }));
                artifact_from_bytes(self.name(), request, &bytes, started, extra)
            })
            .map_err(|err| ProviderError::from_anyhow(self.name(), &err))
    }
}
