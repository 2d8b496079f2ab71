use std::io::Cursor;
use std::time::Instant;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::ProviderError;
use crate::provider::{
    artifact_from_bytes, map_object, GenerateRequest, GeneratedArtifact, ImageProvider,
};

const FORCE_FAIL_MARKER: &str = "force_fail";
const MAX_STUB_EDGE: u32 = 2048;

/// Offline provider that renders a flat colour derived from the prompt.
///
/// Prompts containing `force_fail` fail on purpose so failover can be
/// exercised without a network.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubProvider;

impl StubProvider {
    pub fn new() -> Self {
        Self
    }

    fn render(request: &GenerateRequest) -> Result<Vec<u8>> {
        let width = request.size.width.min(MAX_STUB_EDGE);
        let height = request.size.height.min(MAX_STUB_EDGE);
        let (r, g, b) = color_from_prompt(&request.prompt, request.seed.unwrap_or_default());
        let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .context("failed encoding stub image")?;
        Ok(out.into_inner())
    }
}

impl ImageProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedArtifact, ProviderError> {
        if request
            .prompt
            .to_ascii_lowercase()
            .contains(FORCE_FAIL_MARKER)
        {
            return Err(ProviderError::failed(
                self.name(),
                "forced failure requested by prompt",
            ));
        }
        let started = Instant::now();
        let extra = map_object(json!({ "notes": "stub placeholder" }));
        Self::render(request)
            .and_then(|bytes| artifact_from_bytes(self.name(), request, &bytes, started, extra))
            .map_err(|err| ProviderError::from_anyhow(self.name(), &err))
    }
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
