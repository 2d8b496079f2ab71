use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::error::ProviderError;
use crate::provider::{
    artifact_from_bytes, download_image, map_object, truncate_text, GenerateRequest,
    GeneratedArtifact, ImageProvider,
};

/// ComfyUI-style HTTP workflow endpoint.
///
/// `POST {base}/prompt` answers either with raw image bytes or with
/// `{"ok": true, "image_url": ...}`.
pub struct ComfyUiProvider {
    base_url: String,
    timeout: Duration,
    http: HttpClient,
}

impl ComfyUiProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            http,
        }
    }

    fn call(&self, request: &GenerateRequest) -> Result<(Vec<u8>, Option<String>)> {
        let endpoint = format!("{}/prompt", self.base_url);
        let mut payload = map_object(json!({
            "prompt": request.prompt,
            "size": request.size.to_string(),
        }));
        if let Some(seed) = request.seed {
            payload.insert("seed".to_string(), Value::Number(seed.into()));
        }
        if let Some(reference) = request.reference.as_deref() {
            payload.insert(
                "reference_url".to_string(),
                Value::String(reference.to_string()),
            );
        }

        let response = self
            .http
            .post(&endpoint)
            .json(&payload)
            .send()
            .with_context(|| format!("ComfyUI request failed ({endpoint})"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "ComfyUI request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();
        if content_type.contains("application/json") {
            let body: Value = response
                .json()
                .context("failed parsing ComfyUI JSON response")?;
            let image_url = image_url_from_reply(&body)?;
            let bytes = download_image(&self.http, "ComfyUI", &image_url)?;
            return Ok((bytes, Some(image_url)));
        }

        let bytes = response
            .bytes()
            .context("failed reading ComfyUI image bytes")?
            .to_vec();
        Ok((bytes, None))
    }
}

impl ImageProvider for ComfyUiProvider {
    fn name(&self) -> &str {
        "comfyui"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedArtifact, ProviderError> {
        let started = Instant::now();
        self.call(request)
            .and_then(|(bytes, remote_url)| {
                let mut extra = Map::new();
                if let Some(remote_url) = remote_url {
                    extra.insert("remote_url".to_string(), Value::String(remote_url));
                }
                artifact_from_bytes(self.name(), request, &bytes, started, extra)
            })
            .map_err(|err| ProviderError::from_anyhow(self.name(), &err))
    }
}

fn image_url_from_reply(body: &Value) -> Result<String> {
    if !body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        bail!(
            "ComfyUI returned error JSON: {}",
            truncate_text(&body.to_string(), 512)
        );
    }
    body.get("image_url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("ComfyUI returned ok=true but no image_url"))
}
