use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use likeness_contracts::cancel::CancelToken;
use likeness_contracts::drift::DriftMethod;
use likeness_contracts::events::{read_events, EventWriter};
use likeness_contracts::metrics::ImageMetrics;
use likeness_contracts::observe::{EventLogEmitter, FanoutEmitter, ObservabilityEmitter};
use likeness_contracts::prompts::PromptTierSet;
use likeness_contracts::routing::{normalize_provider_name, parse_provider_list, ProviderChain};
use likeness_contracts::settings::{parse_threshold, Settings};
use likeness_engine::comparator::{Comparator, HistogramEmbedder};
use likeness_engine::error::{EngineError, RoutingError};
use likeness_engine::provider::SizeHint;
use likeness_engine::registry::ProviderRegistry;
use likeness_engine::router::RouterConfig;
use likeness_engine::{EngineConfig, GenerationEngine, GenerationRequest};
use serde_json::{json, Value};

const EXIT_EXHAUSTED: i32 = 2;
const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Parser)]
#[command(name = "likeness", version, about = "Identity-locked image generation router")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one image through the provider chain.
    Generate(GenerateArgs),
    /// Score drift between two local images.
    Score(ScoreArgs),
    /// List registered providers and the resolved chain.
    Providers(ProvidersArgs),
    /// Print events from a JSONL event log.
    Events(EventsArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    recovery: Option<String>,
    #[arg(long)]
    fallback: Option<String>,
    #[arg(long)]
    reference: Option<String>,
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    mode: Option<String>,
    /// Colon-separated fallback providers for exploratory mode.
    #[arg(long)]
    fallbacks: Option<String>,
    #[arg(long, default_value = "1024x1024")]
    size: String,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    method: Option<String>,
    #[arg(long)]
    threshold: Option<String>,
    /// Cancel the request after this many seconds.
    #[arg(long)]
    deadline: Option<f64>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ScoreArgs {
    #[arg(long)]
    candidate: PathBuf,
    #[arg(long)]
    reference: Option<PathBuf>,
    #[arg(long, default_value = "auto")]
    method: String,
}

#[derive(Debug, Parser)]
struct ProvidersArgs {
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    provider: Option<String>,
}

#[derive(Debug, Parser)]
struct EventsArgs {
    #[arg(long)]
    path: PathBuf,
    /// Only events whose type starts with this prefix, e.g. `image.drift`.
    #[arg(long = "type")]
    event_type: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("likeness: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("invalid environment configuration")?;
    match cli.command {
        Command::Generate(args) => run_generate(args, settings),
        Command::Score(args) => run_score(args),
        Command::Providers(args) => run_providers(args, settings),
        Command::Events(args) => run_events(args),
    }
}

fn run_generate(args: GenerateArgs, settings: Settings) -> Result<i32> {
    let settings = apply_generate_overrides(settings, &args)?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| settings.output_dir.join("events.jsonl"));

    let metrics = Arc::new(ImageMetrics::new());
    let emitter = FanoutEmitter::new(vec![
        Arc::new(EventLogEmitter::new(EventWriter::new(&events_path, None)))
            as Arc<dyn ObservabilityEmitter>,
        metrics.clone() as Arc<dyn ObservabilityEmitter>,
    ]);
    let registry = Arc::new(ProviderRegistry::with_defaults(&settings.providers));
    let engine = GenerationEngine::new(
        registry,
        Arc::new(emitter),
        EngineConfig {
            router: RouterConfig {
                mode: settings.mode,
                default_provider: settings.default_provider.clone(),
                fallbacks: settings.fallbacks.clone(),
            },
            drift_threshold: settings.drift_threshold,
            drift_method: settings.drift_method,
            output_dir: settings.output_dir.clone(),
        },
    )?
    .with_scorer(Arc::new(Comparator::with_embedder(Arc::new(
        HistogramEmbedder::default(),
    ))));

    let prompts = PromptTierSet::new(args.prompt, args.recovery, args.fallback)?;
    let request = GenerationRequest {
        prompts,
        reference: args.reference.or(settings.reference_image.clone()),
        provider_override: args.provider,
        size: SizeHint::parse(&args.size),
        seed: args.seed,
        request_id: None,
    };

    let cancel = CancelToken::new();
    if let Some(seconds) = args.deadline {
        let deadline = Duration::try_from_secs_f64(seconds)
            .with_context(|| format!("invalid --deadline '{seconds}'"))?;
        let token = cancel.clone();
        thread::spawn(move || {
            thread::sleep(deadline);
            token.cancel();
        });
    }

    match engine.generate(request, &cancel) {
        Ok(outcome) => {
            let mut report = outcome.to_json();
            report["metrics"] = json!(metrics.snapshot());
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(0)
        }
        Err(err) => {
            eprintln!("likeness: {err:#}");
            Ok(exit_code(&err))
        }
    }
}

fn apply_generate_overrides(mut settings: Settings, args: &GenerateArgs) -> Result<Settings> {
    if let Some(mode) = args.mode.as_deref() {
        settings.mode = mode.parse()?;
    }
    if let Some(method) = args.method.as_deref() {
        settings.drift_method = method.parse()?;
    }
    if let Some(threshold) = args.threshold.as_deref() {
        settings.drift_threshold = parse_threshold(threshold)?;
    }
    if let Some(fallbacks) = args.fallbacks.as_deref() {
        settings.fallbacks = parse_provider_list(fallbacks);
    }
    if let Some(out) = args.out.as_ref() {
        settings.output_dir = out.clone();
    }
    Ok(settings)
}

fn exit_code(err: &EngineError) -> i32 {
    match err {
        EngineError::Routing(RoutingError::ChainExhausted { .. }) => EXIT_EXHAUSTED,
        EngineError::Routing(RoutingError::CancellationRequested { .. }) => EXIT_CANCELLED,
        EngineError::Receipt { .. } => 1,
    }
}

fn run_score(args: ScoreArgs) -> Result<i32> {
    let method: DriftMethod = args.method.parse()?;
    let comparator = Comparator::with_embedder(Arc::new(HistogramEmbedder::default()));
    let comparison =
        comparator.compare_images(&args.candidate, args.reference.as_deref(), method);
    let report = json!({
        "candidate": args.candidate.to_string_lossy(),
        "reference": args.reference.as_ref().map(|path| path.to_string_lossy().to_string()),
        "requested_method": method,
        "method": comparison.method,
        "drift_score": comparison.score,
        "failures": comparison
            .failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<String>>(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(0)
}

fn run_providers(args: ProvidersArgs, mut settings: Settings) -> Result<i32> {
    if let Some(mode) = args.mode.as_deref() {
        settings.mode = mode.parse()?;
    }
    let registry = ProviderRegistry::with_defaults(&settings.providers);
    let chain = ProviderChain::build(
        settings.mode,
        args.provider.as_deref(),
        &settings.default_provider,
        &settings.fallbacks,
    );
    let missing: Vec<&str> = chain
        .iter()
        .filter(|name| !registry.contains(name))
        .collect();
    let report = json!({
        "registered": registry.names(),
        "mode": settings.mode,
        "default_provider": normalize_provider_name(&settings.default_provider),
        "chain": chain,
        "unregistered_in_chain": missing,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(0)
}

fn run_events(args: EventsArgs) -> Result<i32> {
    let events = matching_events(&args.path, args.event_type.as_deref())?;
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(0)
}

fn matching_events(path: &Path, prefix: Option<&str>) -> Result<Vec<Value>> {
    let events = read_events(path)
        .with_context(|| format!("failed to read events from {}", path.display()))?;
    Ok(events
        .into_iter()
        .filter(|event| match prefix {
            Some(prefix) => event
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind.starts_with(prefix)),
            None => true,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use likeness_contracts::drift::DriftMethod;
    use likeness_contracts::ledger::AttemptLedger;
    use likeness_contracts::routing::OperatingMode;
    use likeness_contracts::settings::Settings;
    use likeness_engine::error::{EngineError, RoutingError};

    use likeness_contracts::events::{EventPayload, EventWriter};
    use serde_json::json;

    use super::{
        apply_generate_overrides, exit_code, matching_events, Cli, Command, EXIT_CANCELLED,
        EXIT_EXHAUSTED,
    };

    fn generate_args(argv: &[&str]) -> anyhow::Result<super::GenerateArgs> {
        let mut full = vec!["likeness", "generate"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full)?.command {
            Command::Generate(args) => Ok(args),
            other => anyhow::bail!("parsed unexpected command {other:?}"),
        }
    }

    #[test]
    fn flags_override_environment_settings() -> anyhow::Result<()> {
        let args = generate_args(&[
            "--prompt",
            "a portrait",
            "--mode",
            "sandbox",
            "--method",
            "ssim",
            "--threshold",
            "0.2",
            "--fallbacks",
            "OpenAI: stub",
            "--out",
            "/tmp/likeness-out",
        ])?;
        let settings = apply_generate_overrides(Settings::default(), &args)?;
        assert_eq!(settings.mode, OperatingMode::Exploratory);
        assert_eq!(settings.drift_method, DriftMethod::Ssim);
        assert_eq!(settings.drift_threshold, 0.2);
        assert_eq!(settings.fallbacks, vec!["openai", "stub"]);
        assert_eq!(settings.output_dir.to_string_lossy(), "/tmp/likeness-out");
        Ok(())
    }

    #[test]
    fn out_of_range_threshold_flag_is_rejected() -> anyhow::Result<()> {
        let args = generate_args(&["--prompt", "x", "--threshold", "1.0"])?;
        assert!(apply_generate_overrides(Settings::default(), &args).is_err());
        Ok(())
    }

    #[test]
    fn routing_failures_map_to_distinct_exit_codes() {
        let exhausted = EngineError::Routing(RoutingError::ChainExhausted {
            ledger: AttemptLedger::new(),
        });
        let cancelled = EngineError::Routing(RoutingError::CancellationRequested {
            ledger: AttemptLedger::new(),
        });
        assert_eq!(exit_code(&exhausted), EXIT_EXHAUSTED);
        assert_eq!(exit_code(&cancelled), EXIT_CANCELLED);
    }

    #[test]
    fn events_filter_by_type_prefix() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, None);
        for kind in ["image.routing.policy", "image.drift.breach", "image.drift.unevaluated"] {
            writer.emit(kind, EventPayload::new())?;
        }

        let drift = matching_events(&path, Some("image.drift"))?;
        assert_eq!(drift.len(), 2);
        assert_eq!(drift[0]["type"], json!("image.drift.breach"));
        assert_eq!(matching_events(&path, None)?.len(), 3);
        assert!(matching_events(&temp.path().join("missing.jsonl"), None).is_err());
        Ok(())
    }
}
