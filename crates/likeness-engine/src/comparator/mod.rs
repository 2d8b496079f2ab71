//! Perceptual drift between a generated image and an identity reference.
//!
//! `Auto` walks pHash, SSIM, then embedding and keeps the first number it
//! gets. An explicit method is never substituted: if it cannot run, the
//! score is indeterminate.

mod embedding;
mod phash;
mod ssim;

use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use likeness_contracts::drift::{DriftMethod, DriftScore};

use crate::error::ComparatorError;

pub use embedding::{HistogramEmbedder, ImageEmbedder};

/// Score plus the method that produced it and every method that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub score: DriftScore,
    pub method: Option<DriftMethod>,
    pub failures: Vec<ComparatorError>,
}

impl Comparison {
    pub fn indeterminate(failures: Vec<ComparatorError>) -> Self {
        Self {
            score: DriftScore::Indeterminate,
            method: None,
            failures,
        }
    }

    /// Why no number was produced, joined across failed methods.
    pub fn reason(&self) -> String {
        if self.failures.is_empty() {
            return "no drift method produced a score".to_string();
        }
        self.failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<String>>()
            .join("; ")
    }
}

/// Produces a drift comparison for a candidate image.
pub trait DriftScorer: Send + Sync {
    fn compare(
        &self,
        candidate: &Path,
        reference: Option<&Path>,
        method: DriftMethod,
    ) -> Comparison;
}

#[derive(Clone, Default)]
pub struct Comparator {
    embedder: Option<Arc<dyn ImageEmbedder>>,
}

impl Comparator {
    /// Comparator without an embedding model; `Embedding` is unavailable.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedder(embedder: Arc<dyn ImageEmbedder>) -> Self {
        Self {
            embedder: Some(embedder),
        }
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn score(
        &self,
        candidate: &Path,
        reference: Option<&Path>,
        method: DriftMethod,
    ) -> DriftScore {
        self.compare_images(candidate, reference, method).score
    }

    pub fn compare_images(
        &self,
        candidate: &Path,
        reference: Option<&Path>,
        method: DriftMethod,
    ) -> Comparison {
        let Some(reference) = reference else {
            return Comparison::indeterminate(vec![ComparatorError::NoReference]);
        };
        let (candidate, reference) = match (load(candidate), load(reference)) {
            (Ok(candidate), Ok(reference)) => (candidate, reference),
            (candidate, reference) => {
                let failures = [candidate.err(), reference.err()]
                    .into_iter()
                    .flatten()
                    .collect();
                return Comparison::indeterminate(failures);
            }
        };

        let methods: &[DriftMethod] = match method {
            DriftMethod::Auto => &DriftMethod::CASCADE,
            DriftMethod::Phash => &[DriftMethod::Phash],
            DriftMethod::Ssim => &[DriftMethod::Ssim],
            DriftMethod::Embedding => &[DriftMethod::Embedding],
        };
        let mut failures = Vec::new();
        for method in methods {
            let raw = match self.run(*method, &candidate, &reference) {
                Ok(raw) => raw,
                Err(err) => {
                    failures.push(err);
                    continue;
                }
            };
            match DriftScore::measured(raw) {
                Some(score) => {
                    return Comparison {
                        score,
                        method: Some(*method),
                        failures,
                    }
                }
                None => failures.push(ComparatorError::Numeric { method: *method }),
            }
        }
        Comparison::indeterminate(failures)
    }

    fn run(
        &self,
        method: DriftMethod,
        candidate: &DynamicImage,
        reference: &DynamicImage,
    ) -> Result<f64, ComparatorError> {
        match method {
            DriftMethod::Phash => Ok(phash::drift(candidate, reference)),
            DriftMethod::Ssim => ssim::drift(candidate, reference),
            DriftMethod::Embedding => match self.embedder.as_deref() {
                Some(embedder) => embedding::drift(embedder, candidate, reference),
                None => Err(ComparatorError::Unavailable {
                    method,
                    reason: "no image embedder configured".to_string(),
                }),
            },
            DriftMethod::Auto => Err(ComparatorError::Unavailable {
                method,
                reason: "auto is not a concrete method".to_string(),
            }),
        }
    }
}

impl DriftScorer for Comparator {
    fn compare(
        &self,
        candidate: &Path,
        reference: Option<&Path>,
        method: DriftMethod,
    ) -> Comparison {
        self.compare_images(candidate, reference, method)
    }
}

fn load(path: &Path) -> Result<DynamicImage, ComparatorError> {
    image::open(path).map_err(|err| ComparatorError::Unreadable {
        path: path.to_path_buf(),
        cause: err.to_string(),
    })
}
