use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::ProviderError;
use crate::provider::{
    artifact_from_bytes, map_object, GenerateRequest, GeneratedArtifact, ImageProvider,
};

const LIBRARY_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Serves pre-rendered images from a local directory.
///
/// The image is chosen by hashing the prompt and seed, so the same request
/// always maps to the same library entry.
#[derive(Debug, Clone)]
pub struct LocalLibraryProvider {
    library: Option<PathBuf>,
}

impl LocalLibraryProvider {
    pub fn new(library: Option<PathBuf>) -> Self {
        Self { library }
    }

    fn pick(library: &Path, request: &GenerateRequest) -> Result<PathBuf> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(library)
            .with_context(|| format!("cannot read library {}", library.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && has_library_extension(path))
            .collect();
        entries.sort();
        if entries.is_empty() {
            anyhow::bail!("library {} has no images", library.display());
        }
        let mut hasher = Sha256::new();
        hasher.update(request.prompt.as_bytes());
        hasher.update(request.seed.unwrap_or_default().to_be_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let index = (u64::from_be_bytes(head) % entries.len() as u64) as usize;
        Ok(entries.swap_remove(index))
    }
}

impl ImageProvider for LocalLibraryProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedArtifact, ProviderError> {
        let Some(library) = self.library.as_deref() else {
            return Err(ProviderError::misconfigured(
                self.name(),
                "LIKENESS_LOCAL_LIBRARY not set",
            ));
        };
        let started = Instant::now();
        Self::pick(library, request)
            .and_then(|source| {
                let bytes = std::fs::read(&source)
                    .with_context(|| format!("failed reading {}", source.display()))?;
                let extra = map_object(json!({
                    "source": source.to_string_lossy(),
                }));
                artifact_from_bytes(self.name(), request, &bytes, started, extra)
            })
            .map_err(|err| ProviderError::from_anyhow(self.name(), &err))
    }
}

fn has_library_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| LIBRARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use image::{Rgb, RgbImage};
    use likeness_contracts::prompts::Tier;
    use serde_json::json;

    use super::LocalLibraryProvider;
    use crate::error::ProviderError;
    use crate::provider::{GenerateRequest, ImageProvider, SizeHint};

    fn request(dir: &Path, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            request_id: "req".to_string(),
            prompt: prompt.to_string(),
            tier: Tier::Primary,
            size: SizeHint::default(),
            seed: None,
            reference: None,
            output_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn same_prompt_picks_same_library_entry() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let library = temp.path().join("library");
        std::fs::create_dir_all(&library)?;
        for (idx, name) in ["a.png", "b.png", "c.png"].iter().enumerate() {
            RgbImage::from_pixel(2, 2, Rgb([idx as u8 * 40, 0, 0])).save(library.join(name))?;
        }
        std::fs::write(library.join("notes.txt"), b"ignored")?;

        let provider = LocalLibraryProvider::new(Some(library));
        let out = temp.path().join("out");
        let first = provider.generate(&request(&out, "castle"))?;
        let second = provider.generate(&request(&out, "castle"))?;
        assert_eq!(first.metadata["source"], second.metadata["source"]);
        assert_ne!(first.image_id, second.image_id);
        assert_eq!(first.metadata["engine"], json!("local"));
        Ok(())
    }

    #[test]
    fn missing_or_empty_library_fails() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let unset = LocalLibraryProvider::new(None).generate(&request(temp.path(), "x"));
        assert!(matches!(unset, Err(ProviderError::Misconfigured { .. })));

        let empty = LocalLibraryProvider::new(Some(temp.path().to_path_buf()))
            .generate(&request(temp.path(), "x"));
        assert!(matches!(empty, Err(ProviderError::Failed { .. })));
        Ok(())
    }
}
