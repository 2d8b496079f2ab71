use image::imageops::FilterType;
use image::DynamicImage;
use likeness_contracts::drift::DriftMethod;

use crate::error::ComparatorError;
use crate::provider::error_chain_text;

/// Maps an image to a fixed-length feature vector.
///
/// Implementations backed by a learned model plug in here; the comparator
/// only needs vectors whose cosine similarity tracks visual identity.
pub trait ImageEmbedder: Send + Sync {
    fn name(&self) -> &str;
    fn embed(&self, image: &DynamicImage) -> anyhow::Result<Vec<f32>>;
}

/// Cosine similarity mapped to `[0, 1]`, returned as `1 - similarity`.
pub fn drift(
    embedder: &dyn ImageEmbedder,
    candidate: &DynamicImage,
    reference: &DynamicImage,
) -> Result<f64, ComparatorError> {
    let unavailable = |err: anyhow::Error| ComparatorError::Unavailable {
        method: DriftMethod::Embedding,
        reason: format!("{}: {}", embedder.name(), error_chain_text(&err, 256)),
    };
    let a = embedder.embed(candidate).map_err(unavailable)?;
    let b = embedder.embed(reference).map_err(unavailable)?;
    if a.len() != b.len() || a.is_empty() {
        return Err(ComparatorError::Unavailable {
            method: DriftMethod::Embedding,
            reason: format!(
                "{} produced mismatched embeddings ({} vs {})",
                embedder.name(),
                a.len(),
                b.len()
            ),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(&b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !similarity.is_finite() {
        return Err(ComparatorError::Numeric {
            method: DriftMethod::Embedding,
        });
    }
    let sim01 = (similarity.clamp(-1.0, 1.0) + 1.0) / 2.0;
    Ok(1.0 - sim01)
}

/// Spatial colour histogram, mean-centred so unrelated images can score
/// below zero similarity.
#[derive(Debug, Clone, Copy)]
pub struct HistogramEmbedder {
    grid: u32,
    bins: u32,
}

impl Default for HistogramEmbedder {
    fn default() -> Self {
        Self { grid: 4, bins: 4 }
    }
}

impl HistogramEmbedder {
    pub fn new(grid: u32, bins: u32) -> Self {
        Self {
            grid: grid.max(1),
            bins: bins.clamp(1, 16),
        }
    }

    pub fn dimensions(&self) -> usize {
        (self.grid * self.grid * self.bins.pow(3)) as usize
    }
}

impl ImageEmbedder for HistogramEmbedder {
    fn name(&self) -> &str {
        "histogram"
    }

    fn embed(&self, image: &DynamicImage) -> anyhow::Result<Vec<f32>> {
        let edge = self.grid * 16;
        let rgb = image::imageops::resize(&image.to_rgb8(), edge, edge, FilterType::Triangle);
        let bins = self.bins as usize;
        let cell_bins = bins * bins * bins;
        let mut vector = vec![0.0f32; self.dimensions()];
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let cell = ((y / 16) * self.grid + x / 16) as usize;
            let quantize = |channel: u8| (usize::from(channel) * bins) / 256;
            let [r, g, b] = pixel.0;
            let bin = (quantize(r) * bins + quantize(g)) * bins + quantize(b);
            vector[cell * cell_bins + bin] += 1.0;
        }
        let total = (edge * edge) as f32;
        let mean = 1.0 / vector.len() as f32;
        for value in &mut vector {
            *value = *value / total - mean;
        }
        Ok(vector)
    }
}
