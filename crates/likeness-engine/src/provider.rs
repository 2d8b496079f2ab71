use std::fmt;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use image::ImageFormat;
use likeness_contracts::locator::file_locator;
use likeness_contracts::prompts::Tier;
use reqwest::blocking::Response as HttpResponse;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::ProviderError;

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Requested output dimensions, parsed leniently from `"WxH"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeHint {
    pub width: u32,
    pub height: u32,
}

impl SizeHint {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_ascii_lowercase();
        if let Some((w, h)) = raw.split_once('x') {
            let width = w.trim().parse::<u32>().unwrap_or(1024);
            let height = h.trim().parse::<u32>().unwrap_or(1024);
            return Self {
                width: width.max(1),
                height: height.max(1),
            };
        }
        Self::default()
    }
}

impl Default for SizeHint {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
        }
    }
}

impl fmt::Display for SizeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One tier attempt against one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub request_id: String,
    pub prompt: String,
    pub tier: Tier,
    pub size: SizeHint,
    pub seed: Option<u64>,
    /// Locator of the identity reference, passed through as a hint.
    pub reference: Option<String>,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedArtifact {
    pub image_id: String,
    pub locator: String,
    pub path: PathBuf,
    pub reference_used: bool,
    pub metadata: Map<String, Value>,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Upper bound the router allows one `generate` call.
    fn timeout(&self) -> Duration {
        DEFAULT_PROVIDER_TIMEOUT
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedArtifact, ProviderError>;
}

/// Re-encodes `bytes` as PNG and persists it as `<image_id>.png` in
/// `output_dir`. The file only appears once fully written.
pub fn persist_image_bytes(output_dir: &Path, image_id: &str, bytes: &[u8]) -> Result<PathBuf> {
    let decoded = image::load_from_memory(bytes).context("provider returned undecodable image")?;
    let mut encoded = Cursor::new(Vec::new());
    decoded
        .write_to(&mut encoded, ImageFormat::Png)
        .context("failed encoding PNG")?;
    persist_file_bytes(output_dir, image_id, encoded.get_ref())
}

fn persist_file_bytes(output_dir: &Path, image_id: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let target = output_dir.join(format!("{image_id}.png"));
    let mut temp = NamedTempFile::new_in(output_dir)
        .with_context(|| format!("failed to stage file in {}", output_dir.display()))?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(&target)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}

/// Persists `bytes` and wraps them as an artifact with the standard metadata.
pub fn artifact_from_bytes(
    engine: &str,
    request: &GenerateRequest,
    bytes: &[u8],
    started: Instant,
    extra: Map<String, Value>,
) -> Result<GeneratedArtifact> {
    let image_id = new_image_id();
    let path = persist_image_bytes(&request.output_dir, &image_id, bytes)?;
    Ok(artifact_at(engine, request, image_id, path, started, extra))
}

pub(crate) fn artifact_at(
    engine: &str,
    request: &GenerateRequest,
    image_id: String,
    path: PathBuf,
    started: Instant,
    extra: Map<String, Value>,
) -> GeneratedArtifact {
    let mut metadata = map_object(json!({
        "latency_ms": u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "engine": engine,
        "prompt_hash": prompt_hash(&request.prompt),
        "size": request.size.to_string(),
        "tier": request.tier,
        "seed": request.seed,
        "request_id": request.request_id,
    }));
    metadata.extend(extra);
    GeneratedArtifact {
        image_id,
        locator: file_locator(&path),
        path,
        reference_used: request.reference.is_some(),
        metadata,
    }
}

/// First 16 hex chars of sha256(prompt).
pub fn prompt_hash(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(digest)[..16].to_string()
}

pub fn new_image_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Downloads an image body, failing on non-2xx responses.
pub(crate) fn download_image(
    http: &reqwest::blocking::Client,
    provider: &str,
    url: &str,
) -> Result<Vec<u8>> {
    let response = http
        .get(url)
        .send()
        .with_context(|| format!("failed downloading {provider} image ({url})"))?;
    if !response.status().is_success() {
        let code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        bail!(
            "{provider} image download failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    Ok(response
        .bytes()
        .with_context(|| format!("failed reading {provider} image bytes"))?
        .to_vec())
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::time::Instant;

    use image::{ImageFormat, Rgb, RgbImage};
    use likeness_contracts::prompts::Tier;
    use serde_json::{json, Map};

    use super::{
        artifact_from_bytes, persist_image_bytes, prompt_hash, truncate_text, GenerateRequest,
        SizeHint,
    };

    fn png_bytes() -> anyhow::Result<Vec<u8>> {
        let image = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    #[test]
    fn size_hint_parses_leniently() {
        assert_eq!(SizeHint::parse("512x768"), SizeHint { width: 512, height: 768 });
        assert_eq!(SizeHint::parse(" 640 X 0 "), SizeHint { width: 640, height: 1 });
        assert_eq!(SizeHint::parse("square"), SizeHint::default());
        assert_eq!(SizeHint::default().to_string(), "1024x1024");
    }

    #[test]
    fn persist_writes_png_and_leaves_no_temp_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let out_dir = temp.path().join("outputs");
        let path = persist_image_bytes(&out_dir, "abc", &png_bytes()?)?;
        assert_eq!(path, out_dir.join("abc.png"));
        assert_eq!(image::open(&path)?.width(), 4);
        assert_eq!(std::fs::read_dir(&out_dir)?.count(), 1);
        Ok(())
    }

    #[test]
    fn undecodable_bytes_leave_nothing_behind() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        assert!(persist_image_bytes(temp.path(), "bad", b"<html>").is_err());
        assert_eq!(std::fs::read_dir(temp.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn artifact_metadata_carries_provenance() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let request = GenerateRequest {
            request_id: "req-9".to_string(),
            prompt: "a lighthouse".to_string(),
            tier: Tier::Recovery,
            size: SizeHint::parse("4x4"),
            seed: Some(3),
            reference: Some("file:///refs/a.png".to_string()),
            output_dir: PathBuf::from(temp.path()),
        };
        let mut extra = Map::new();
        extra.insert("remote_url".to_string(), json!("http://x/y.png"));
        let artifact = artifact_from_bytes("comfyui", &request, &png_bytes()?, Instant::now(), extra)?;

        assert!(artifact.path.exists());
        assert!(artifact.locator.starts_with("file://"));
        assert!(artifact.reference_used);
        assert_eq!(artifact.image_id.len(), 32);
        assert_eq!(artifact.metadata["engine"], json!("comfyui"));
        assert_eq!(artifact.metadata["tier"], json!("recovery"));
        assert_eq!(artifact.metadata["prompt_hash"], json!(prompt_hash("a lighthouse")));
        assert_eq!(artifact.metadata["remote_url"], json!("http://x/y.png"));
        Ok(())
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
