pub mod comparator;
pub mod error;
pub mod identity;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod router;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use likeness_contracts::artifact::ArtifactRecord;
use likeness_contracts::cancel::CancelToken;
use likeness_contracts::drift::{DriftMethod, IdentityVerdict};
use likeness_contracts::error::SettingsError;
use likeness_contracts::ledger::AttemptLedger;
use likeness_contracts::locator::{FileLocatorResolver, LocatorResolver};
use likeness_contracts::observe::ObservabilityEmitter;
use likeness_contracts::prompts::PromptTierSet;
use likeness_contracts::routing::{OperatingMode, ProviderChain};
use likeness_contracts::runs::receipts::{
    build_receipt, receipt_path_for, write_receipt, ReceiptRequest, ReceiptResolution,
};
use serde_json::{json, Value};

use crate::comparator::{Comparator, Comparison, DriftScorer};
use crate::error::{ComparatorError, EngineError};
use crate::identity::IdentityLock;
use crate::provider::{new_image_id, SizeHint};
use crate::registry::ProviderRegistry;
use crate::router::{RouteRequest, RouterConfig, TieredRouter};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub router: RouterConfig,
    pub drift_threshold: f64,
    pub drift_method: DriftMethod,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompts: PromptTierSet,
    /// Locator of the identity reference image.
    pub reference: Option<String>,
    pub provider_override: Option<String>,
    pub size: SizeHint,
    pub seed: Option<u64>,
    pub request_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompts: PromptTierSet) -> Self {
        Self {
            prompts,
            reference: None,
            provider_override: None,
            size: SizeHint::default(),
            seed: None,
            request_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub record: ArtifactRecord,
    pub verdict: IdentityVerdict,
    pub drift_method: Option<DriftMethod>,
    pub chain: ProviderChain,
    pub ledger: AttemptLedger,
    pub image_path: PathBuf,
    pub receipt_path: PathBuf,
}

impl GenerationOutcome {
    pub fn to_json(&self) -> Value {
        json!({
            "record": self.record,
            "verdict": self.verdict,
            "drift_method": self.drift_method,
            "chain": self.chain,
            "attempts": self.ledger,
            "image_path": self.image_path.to_string_lossy(),
            "receipt_path": self.receipt_path.to_string_lossy(),
        })
    }
}

/// Routes a request, scores the result against the reference, applies the
/// identity lock and writes the provenance receipt.
pub struct GenerationEngine {
    router: TieredRouter,
    scorer: Arc<dyn DriftScorer>,
    locators: Arc<dyn LocatorResolver>,
    emitter: Arc<dyn ObservabilityEmitter>,
    identity: IdentityLock,
    drift_method: DriftMethod,
    output_dir: PathBuf,
}

impl GenerationEngine {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        emitter: Arc<dyn ObservabilityEmitter>,
        config: EngineConfig,
    ) -> Result<Self, SettingsError> {
        let identity = IdentityLock::new(config.drift_threshold)?;
        Ok(Self {
            router: TieredRouter::new(registry, Arc::clone(&emitter), config.router),
            scorer: Arc::new(Comparator::new()),
            locators: Arc::new(FileLocatorResolver),
            emitter,
            identity,
            drift_method: config.drift_method,
            output_dir: config.output_dir,
        })
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn DriftScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_locator_resolver(mut self, locators: Arc<dyn LocatorResolver>) -> Self {
        self.locators = locators;
        self
    }

    pub fn router(&self) -> &TieredRouter {
        &self.router
    }

    pub fn set_mode(&mut self, mode: OperatingMode) {
        self.router.set_mode(mode);
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn generate(
        &self,
        request: GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<GenerationOutcome, EngineError> {
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(new_image_id);
        let routed = self.router.route(
            &RouteRequest {
                request_id: request_id.clone(),
                prompts: request.prompts.clone(),
                provider_override: request.provider_override.clone(),
                reference: request.reference.clone(),
                size: request.size,
                seed: request.seed,
                output_dir: self.output_dir.clone(),
            },
            cancel,
        )?;

        let artifact = routed.artifact;
        let candidate = self
            .locators
            .to_path(&artifact.locator)
            .unwrap_or_else(|| artifact.path.clone());
        let comparison = self.compare(&candidate, request.reference.as_deref());
        let verdict = self.identity.evaluate(comparison.score);

        let mut metadata = artifact.metadata.clone();
        metadata.insert("drift_method".to_string(), json!(comparison.method));
        metadata.insert("verdict".to_string(), json!(verdict));
        let record = ArtifactRecord {
            image_id: artifact.image_id.clone(),
            locator: artifact.locator.clone(),
            provider: routed.provider.clone(),
            tier: routed.tier,
            reference_used: artifact.reference_used,
            drift_score: comparison.score,
            latency_ms: u64::try_from(routed.latency.as_millis()).unwrap_or(u64::MAX),
            metadata,
        };

        let receipt_path = receipt_path_for(&artifact.path, &record.image_id);
        let receipt = build_receipt(
            &ReceiptRequest {
                request_id,
                prompts: request.prompts,
                mode: self.router.mode(),
                provider_override: request.provider_override,
                reference_image: request.reference,
                size: request.size.to_string(),
                seed: request.seed,
            },
            &ReceiptResolution {
                chain: routed.chain.clone(),
                provider: routed.provider.clone(),
                tier: routed.tier,
                drift_method: self.drift_method,
                drift_threshold: self.identity.threshold(),
                verdict,
            },
            &routed.ledger,
            &record,
            &artifact.path,
            &receipt_path,
        );
        write_receipt(&receipt_path, &receipt).map_err(|err| EngineError::Receipt {
            image_id: record.image_id.clone(),
            cause: format!("{err:#}"),
        })?;

        match verdict {
            IdentityVerdict::Breach { drift, threshold } => {
                self.emitter.record_breach(drift, threshold, &record.image_id);
            }
            IdentityVerdict::Unevaluated => {
                self.emitter
                    .record_drift_unevaluated(&record.image_id, &comparison.reason());
            }
            IdentityVerdict::Pass { .. } => {}
        }
        self.emitter.record_generation(&record);

        Ok(GenerationOutcome {
            record,
            verdict,
            drift_method: comparison.method,
            chain: routed.chain,
            ledger: routed.ledger,
            image_path: artifact.path,
            receipt_path,
        })
    }

    fn compare(&self, candidate: &Path, reference: Option<&str>) -> Comparison {
        let Some(locator) = reference else {
            return self.checked(self.scorer.compare(candidate, None, self.drift_method));
        };
        match self.locators.to_path(locator) {
            Some(path) => {
                self.checked(self.scorer.compare(candidate, Some(&path), self.drift_method))
            }
            None => Comparison::indeterminate(vec![ComparatorError::Unreadable {
                path: PathBuf::from(locator),
                cause: "reference locator does not resolve to a local file".to_string(),
            }]),
        }
    }

    /// Scorers are pluggable, so their output is clamped again here and a
    /// non-finite value becomes indeterminate.
    fn checked(&self, mut comparison: Comparison) -> Comparison {
        let validated = comparison.score.validated();
        if validated.is_indeterminate() && !comparison.score.is_indeterminate() {
            let method = comparison.method.take().unwrap_or(self.drift_method);
            comparison.failures.push(ComparatorError::Numeric { method });
        }
        comparison.score = validated;
        comparison
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use likeness_contracts::cancel::CancelToken;
    use likeness_contracts::drift::{DriftMethod, DriftScore, IdentityVerdict};
    use likeness_contracts::events::{read_events, EventWriter};
    use likeness_contracts::metrics::ImageMetrics;
    use likeness_contracts::observe::{EventLogEmitter, FanoutEmitter, ObservabilityEmitter};
    use likeness_contracts::prompts::PromptTierSet;
    use likeness_contracts::routing::OperatingMode;
    use serde_json::{json, Value};

    use super::{EngineConfig, GenerationEngine, GenerationRequest};
    use crate::comparator::{Comparison, DriftScorer};
    use crate::error::{EngineError, ProviderError, RoutingError};
    use crate::provider::{GenerateRequest, GeneratedArtifact, ImageProvider};
    use crate::providers::StubProvider;
    use crate::registry::ProviderRegistry;
    use crate::router::RouterConfig;

    struct FixedScorer(f64);

    /// Returns whatever score it holds, bypassing range checks.
    struct RawScorer(DriftScore);

    impl DriftScorer for RawScorer {
        fn compare(
            &self,
            _candidate: &Path,
            _reference: Option<&Path>,
            method: DriftMethod,
        ) -> Comparison {
            Comparison {
                score: self.0,
                method: Some(method),
                failures: Vec::new(),
            }
        }
    }

    impl DriftScorer for FixedScorer {
        fn compare(
            &self,
            _candidate: &Path,
            reference: Option<&Path>,
            method: DriftMethod,
        ) -> Comparison {
            match (reference, DriftScore::measured(self.0)) {
                (Some(_), Some(score)) => Comparison {
                    score,
                    method: Some(method),
                    failures: Vec::new(),
                },
                _ => Comparison::indeterminate(Vec::new()),
            }
        }
    }

    /// Writes its artifact under a path whose parent cannot hold a receipt.
    struct MisplacedProvider {
        blocker: PathBuf,
    }

    impl ImageProvider for MisplacedProvider {
        fn name(&self) -> &str {
            "misplaced"
        }

        fn generate(&self, request: &GenerateRequest) -> Result<GeneratedArtifact, ProviderError> {
            let mut artifact = StubProvider::new().generate(request)?;
            artifact.path = self.blocker.join("image.png");
            Ok(artifact)
        }
    }

    struct Harness {
        _temp: tempfile::TempDir,
        events: PathBuf,
        reference: PathBuf,
        metrics: Arc<ImageMetrics>,
        engine: GenerationEngine,
    }

    fn harness(
        registry: ProviderRegistry,
        mode: OperatingMode,
        default_provider: &str,
        threshold: f64,
    ) -> anyhow::Result<Harness> {
        let temp = tempfile::tempdir()?;
        let events = temp.path().join("events.jsonl");
        let reference = temp.path().join("reference.png");
        image::RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3])).save(&reference)?;

        let metrics = Arc::new(ImageMetrics::new());
        let emitter = FanoutEmitter::new(vec![
            Arc::new(EventLogEmitter::new(EventWriter::new(&events, None)))
                as Arc<dyn ObservabilityEmitter>,
            metrics.clone() as Arc<dyn ObservabilityEmitter>,
        ]);
        let engine = GenerationEngine::new(
            Arc::new(registry),
            Arc::new(emitter),
            EngineConfig {
                router: RouterConfig {
                    mode,
                    default_provider: default_provider.to_string(),
                    fallbacks: vec!["stub".to_string()],
                },
                drift_threshold: threshold,
                drift_method: DriftMethod::Auto,
                output_dir: temp.path().join("outputs"),
            },
        )?;
        Ok(Harness {
            _temp: temp,
            events,
            reference,
            metrics,
            engine,
        })
    }

    fn stub_registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register_instance("stub", Arc::new(StubProvider::new()));
        registry
    }

    fn event_types(path: &Path) -> anyhow::Result<Vec<String>> {
        Ok(read_events(path)?
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    #[test]
    fn breach_is_advisory_and_emitted() -> anyhow::Result<()> {
        let harness = harness(stub_registry(), OperatingMode::Strict, "stub", 0.35)?;
        let engine = harness.engine.with_scorer(Arc::new(FixedScorer(0.9)));
        let mut request = GenerationRequest::new(PromptTierSet::primary_only("portrait of alpha")?);
        request.reference = Some(harness.reference.to_string_lossy().to_string());

        let outcome = engine.generate(request, &CancelToken::new())?;
        assert_eq!(outcome.record.drift_score, DriftScore::Measured(0.9));
        assert_eq!(
            outcome.verdict,
            IdentityVerdict::Breach {
                drift: 0.9,
                threshold: 0.35
            }
        );
        assert!(outcome.record.reference_used);

        let events = read_events(&harness.events)?;
        let breach = events
            .iter()
            .find(|row| row["type"] == json!("image.drift.breach"))
            .cloned()
            .unwrap_or(Value::Null);
        assert_eq!(breach["drift_score"], json!(0.9));
        assert_eq!(breach["threshold"], json!(0.35));
        assert_eq!(breach["image_id"], json!(outcome.record.image_id));
        assert_eq!(harness.metrics.get("image.drift.detected"), 1);
        assert_eq!(harness.metrics.get("images_generated"), 1);
        Ok(())
    }

    #[test]
    fn missing_reference_never_breaches() -> anyhow::Result<()> {
        let harness = harness(stub_registry(), OperatingMode::Strict, "stub", 0.01)?;
        let engine = harness.engine.with_scorer(Arc::new(FixedScorer(0.99)));
        let outcome = engine.generate(
            GenerationRequest::new(PromptTierSet::primary_only("a sunset")?),
            &CancelToken::new(),
        )?;
        assert_eq!(outcome.record.drift_score, DriftScore::Indeterminate);
        assert_eq!(outcome.verdict, IdentityVerdict::Unevaluated);

        let types = event_types(&harness.events)?;
        assert!(!types.iter().any(|kind| kind == "image.drift.breach"));
        assert!(types.iter().any(|kind| kind == "image.drift.unevaluated"));
        assert_eq!(harness.metrics.get("image.drift.detected"), 0);
        Ok(())
    }

    #[test]
    fn non_finite_scorer_output_is_unevaluated() -> anyhow::Result<()> {
        let harness = harness(stub_registry(), OperatingMode::Strict, "stub", 0.35)?;
        let engine = harness
            .engine
            .with_scorer(Arc::new(RawScorer(DriftScore::Measured(f64::NAN))));
        let mut request = GenerationRequest::new(PromptTierSet::primary_only("portrait")?);
        request.reference = Some(harness.reference.to_string_lossy().to_string());

        let outcome = engine.generate(request, &CancelToken::new())?;
        assert_eq!(outcome.record.drift_score, DriftScore::Indeterminate);
        assert_eq!(outcome.verdict, IdentityVerdict::Unevaluated);
        assert_eq!(outcome.drift_method, None);

        let unevaluated = read_events(&harness.events)?
            .into_iter()
            .find(|row| row["type"] == json!("image.drift.unevaluated"))
            .unwrap_or(Value::Null);
        assert!(unevaluated["reason"]
            .as_str()
            .unwrap_or("")
            .contains("non-finite"));
        assert_eq!(harness.metrics.get("image.drift.detected"), 0);
        assert_eq!(harness.metrics.get("image.drift.unevaluated"), 1);
        Ok(())
    }

    #[test]
    fn out_of_range_scorer_output_is_clamped() -> anyhow::Result<()> {
        let harness = harness(stub_registry(), OperatingMode::Strict, "stub", 0.35)?;
        let engine = harness
            .engine
            .with_scorer(Arc::new(RawScorer(DriftScore::Measured(1.7))));
        let mut request = GenerationRequest::new(PromptTierSet::primary_only("portrait")?);
        request.reference = Some(harness.reference.to_string_lossy().to_string());

        let outcome = engine.generate(request, &CancelToken::new())?;
        assert_eq!(outcome.record.drift_score, DriftScore::Measured(1.0));
        assert_eq!(
            outcome.verdict,
            IdentityVerdict::Breach {
                drift: 1.0,
                threshold: 0.35
            }
        );
        let receipt: Value = serde_json::from_str(&std::fs::read_to_string(&outcome.receipt_path)?)?;
        assert_eq!(receipt["drift_score"], json!(1.0));
        Ok(())
    }

    #[test]
    fn file_uri_reference_is_scored_by_phash() -> anyhow::Result<()> {
        let harness = harness(stub_registry(), OperatingMode::Strict, "stub", 0.35)?;
        let mut request = GenerationRequest::new(PromptTierSet::primary_only("flat colour")?);
        request.reference = Some(format!("file://{}", harness.reference.display()));
        request.seed = Some(5);
        let outcome = harness.engine.generate(request, &CancelToken::new())?;
        assert_eq!(outcome.drift_method, Some(DriftMethod::Phash));
        assert!(outcome.record.drift_score.value().is_some());
        Ok(())
    }

    #[test]
    fn success_writes_receipt_and_events_in_order() -> anyhow::Result<()> {
        let harness = harness(stub_registry(), OperatingMode::Exploratory, "midjourney", 0.35)?;
        let outcome = harness.engine.generate(
            GenerationRequest::new(PromptTierSet::primary_only("a lighthouse")?),
            &CancelToken::new(),
        )?;
        assert_eq!(outcome.record.provider, "stub");
        assert_eq!(outcome.ledger.len(), 2);
        assert!(outcome.image_path.exists());

        let receipt: Value = serde_json::from_str(&std::fs::read_to_string(&outcome.receipt_path)?)?;
        assert_eq!(receipt["resolved"]["provider"], json!("stub"));
        assert_eq!(receipt["resolved"]["chain"], json!(["midjourney", "stub"]));
        assert_eq!(receipt["attempts"][0]["error"]["kind"], json!("unknown_provider"));
        assert_eq!(receipt["drift_score"], Value::Null);

        assert_eq!(
            event_types(&harness.events)?,
            vec![
                "image.routing.policy",
                "image.attempt.fail",
                "image.attempt.ok",
                "image.drift.unevaluated",
                "image.generate.ok",
            ]
        );
        assert_eq!(outcome.to_json()["record"]["provider"], json!("stub"));
        Ok(())
    }

    #[test]
    fn exhaustion_surfaces_routing_error() -> anyhow::Result<()> {
        let harness = harness(ProviderRegistry::new(), OperatingMode::Strict, "stub", 0.35)?;
        let result = harness.engine.generate(
            GenerationRequest::new(PromptTierSet::primary_only("x")?),
            &CancelToken::new(),
        );
        match result {
            Err(EngineError::Routing(RoutingError::ChainExhausted { ledger })) => {
                assert_eq!(ledger.len(), 1);
            }
            Err(other) => anyhow::bail!("unexpected error {other}"),
            Ok(_) => anyhow::bail!("generation should fail with an empty registry"),
        }
        Ok(())
    }

    #[test]
    fn receipt_failure_is_reported_with_image_id() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory")?;
        let mut registry = stub_registry();
        registry.register_instance("misplaced", Arc::new(MisplacedProvider { blocker }));
        let harness = harness(registry, OperatingMode::Strict, "misplaced", 0.35)?;

        let result = harness.engine.generate(
            GenerationRequest::new(PromptTierSet::primary_only("x")?),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(EngineError::Receipt { .. })));
        Ok(())
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        let result = GenerationEngine::new(
            Arc::new(ProviderRegistry::new()),
            Arc::new(ImageMetrics::new()),
            EngineConfig {
                router: RouterConfig {
                    mode: OperatingMode::Strict,
                    default_provider: "stub".to_string(),
                    fallbacks: Vec::new(),
                },
                drift_threshold: 1.5,
                drift_method: DriftMethod::Auto,
                output_dir: PathBuf::from("outputs"),
            },
        );
        assert!(result.is_err());
    }
}
