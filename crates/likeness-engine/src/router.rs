use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use likeness_contracts::cancel::CancelToken;
use likeness_contracts::ledger::{AttemptErrorKind, AttemptLedger, GenerationAttempt};
use likeness_contracts::observe::ObservabilityEmitter;
use likeness_contracts::prompts::{PromptTierSet, Tier};
use likeness_contracts::routing::{OperatingMode, ProviderChain};

use crate::error::{ProviderError, RoutingError};
use crate::provider::{GenerateRequest, GeneratedArtifact, ImageProvider, SizeHint};
use crate::registry::ProviderRegistry;

/// Wait granularity while an attempt is in flight.
const POLL_SLICE: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    pub mode: OperatingMode,
    pub default_provider: String,
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub request_id: String,
    pub prompts: PromptTierSet,
    pub provider_override: Option<String>,
    pub reference: Option<String>,
    pub size: SizeHint,
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutedArtifact {
    pub artifact: GeneratedArtifact,
    pub provider: String,
    pub tier: Tier,
    pub latency: Duration,
    pub chain: ProviderChain,
    pub ledger: AttemptLedger,
}

/// Sequential provider/tier failover. The first success wins.
pub struct TieredRouter {
    registry: Arc<ProviderRegistry>,
    emitter: Arc<dyn ObservabilityEmitter>,
    config: RouterConfig,
    chain: ProviderChain,
}

enum AttemptEnd {
    Finished(Result<GeneratedArtifact, ProviderError>),
    TimedOut,
    Cancelled,
}

impl TieredRouter {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        emitter: Arc<dyn ObservabilityEmitter>,
        config: RouterConfig,
    ) -> Self {
        let chain = Self::build_chain(&config, None);
        Self {
            registry,
            emitter,
            config,
            chain,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.config.mode
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn set_mode(&mut self, mode: OperatingMode) {
        self.config.mode = mode;
        self.chain = Self::build_chain(&self.config, None);
    }

    /// Chain for one request; the configured chain when there is no override.
    pub fn chain_for(&self, provider_override: Option<&str>) -> ProviderChain {
        match provider_override.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => Self::build_chain(&self.config, Some(name)),
            None => self.chain.clone(),
        }
    }

    fn build_chain(config: &RouterConfig, provider_override: Option<&str>) -> ProviderChain {
        ProviderChain::build(
            config.mode,
            provider_override,
            &config.default_provider,
            &config.fallbacks,
        )
    }

    /// Walks the chain in order and, per provider, the prompt tiers in order.
    /// The first successful attempt wins.
    ///
    /// Blank tiers are skipped, as is a tier whose text repeats an earlier
    /// tier for the same provider; neither is sent nor ledgered. Unknown
    /// provider names are ledgered and skipped.
    pub fn route(
        &self,
        request: &RouteRequest,
        cancel: &CancelToken,
    ) -> Result<RoutedArtifact, RoutingError> {
        let chain = self.chain_for(request.provider_override.as_deref());
        self.emitter.record_routing_policy(self.config.mode, &chain);

        let mut ledger = AttemptLedger::new();
        for name in chain.iter() {
            if cancel.is_cancelled() {
                return Err(RoutingError::CancellationRequested { ledger });
            }
            let provider = match self.registry.resolve(name) {
                Ok(provider) => provider,
                Err(err) => {
                    self.record(
                        &mut ledger,
                        GenerationAttempt::failed(
                            name,
                            None,
                            Duration::ZERO,
                            AttemptErrorKind::UnknownProvider,
                            err.to_string(),
                        ),
                    );
                    continue;
                }
            };

            let mut tried: Vec<&str> = Vec::new();
            for (tier, prompt) in request.prompts.iter() {
                if prompt.trim().is_empty() || tried.contains(&prompt) {
                    continue;
                }
                tried.push(prompt);
                if cancel.is_cancelled() {
                    return Err(RoutingError::CancellationRequested { ledger });
                }

                let started = Instant::now();
                let end = run_attempt(
                    Arc::clone(&provider),
                    GenerateRequest {
                        request_id: request.request_id.clone(),
                        prompt: prompt.to_string(),
                        tier,
                        size: request.size,
                        seed: request.seed,
                        reference: request.reference.clone(),
                        output_dir: request.output_dir.clone(),
                    },
                    cancel,
                );
                let latency = started.elapsed();
                match end {
                    AttemptEnd::Finished(Ok(artifact)) => {
                        self.record(
                            &mut ledger,
                            GenerationAttempt::succeeded(name, tier, latency),
                        );
                        return Ok(RoutedArtifact {
                            artifact,
                            provider: name.to_string(),
                            tier,
                            latency,
                            chain: chain.clone(),
                            ledger,
                        });
                    }
                    AttemptEnd::Finished(Err(err)) => {
                        self.record(
                            &mut ledger,
                            GenerationAttempt::failed(
                                name,
                                Some(tier),
                                latency,
                                err.kind(),
                                err.to_string(),
                            ),
                        );
                    }
                    AttemptEnd::TimedOut => {
                        let err = ProviderError::Timeout {
                            provider: name.to_string(),
                            timeout_ms: u64::try_from(provider.timeout().as_millis())
                                .unwrap_or(u64::MAX),
                        };
                        self.record(
                            &mut ledger,
                            GenerationAttempt::failed(
                                name,
                                Some(tier),
                                latency,
                                err.kind(),
                                err.to_string(),
                            ),
                        );
                    }
                    AttemptEnd::Cancelled => {
                        self.record(
                            &mut ledger,
                            GenerationAttempt::failed(
                                name,
                                Some(tier),
                                latency,
                                AttemptErrorKind::Cancelled,
                                "cancelled while in flight",
                            ),
                        );
                        return Err(RoutingError::CancellationRequested { ledger });
                    }
                }
            }
        }
        Err(RoutingError::ChainExhausted { ledger })
    }

    fn record(&self, ledger: &mut AttemptLedger, attempt: GenerationAttempt) {
        self.emitter.record_attempt(&attempt);
        ledger.push(attempt);
    }
}

/// Runs one `generate` call on a worker thread bounded by the provider
/// timeout and the cancel token.
///
/// An abandoned worker deletes whatever artifact it eventually produces.
/// The `abandoned` flag and the send happen under one lock, so a result is
/// either delivered here or cleaned up by the worker, never both or neither.
fn run_attempt(
    provider: Arc<dyn ImageProvider>,
    request: GenerateRequest,
    cancel: &CancelToken,
) -> AttemptEnd {
    let timeout = provider.timeout();
    let abandoned = Arc::new(Mutex::new(false));
    let (tx, rx) = mpsc::channel();

    let worker_abandoned = Arc::clone(&abandoned);
    let spawned = thread::Builder::new()
        .name(format!("likeness-{}", provider.name()))
        .spawn(move || {
            let result = provider.generate(&request);
            let Ok(abandoned) = worker_abandoned.lock() else {
                discard(result);
                return;
            };
            if *abandoned {
                discard(result);
            } else if let Err(mpsc::SendError(result)) = tx.send(result) {
                discard(result);
            }
        });
    if let Err(err) = spawned {
        return AttemptEnd::Finished(Err(ProviderError::failed(
            "router",
            format!("failed to spawn attempt worker: {err}"),
        )));
    }

    // `None` when the timeout is too large to represent: wait on cancel only.
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if cancel.is_cancelled() {
            abandon(&abandoned, &rx);
            return AttemptEnd::Cancelled;
        }
        let slice = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    abandon(&abandoned, &rx);
                    return AttemptEnd::TimedOut;
                }
                remaining.min(POLL_SLICE)
            }
            None => POLL_SLICE,
        };
        match rx.recv_timeout(slice) {
            Ok(result) => return AttemptEnd::Finished(result),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return AttemptEnd::Finished(Err(ProviderError::failed(
                    "router",
                    "attempt worker exited without a result",
                )))
            }
        }
    }
}

fn abandon(
    abandoned: &Mutex<bool>,
    rx: &Receiver<Result<GeneratedArtifact, ProviderError>>,
) {
    if let Ok(mut flag) = abandoned.lock() {
        *flag = true;
    }
    while let Ok(result) = rx.try_recv() {
        discard(result);
    }
}

fn discard(result: Result<GeneratedArtifact, ProviderError>) {
    if let Ok(artifact) = result {
        let _ = std::fs::remove_file(&artifact.path);
    }
}
