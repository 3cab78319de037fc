use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use consensus_engine::telemetry::init_tracing;
use consensus_engine::{
    ConsensusEngine, ConsensusResult, EngineConfig, FraudGuard, InMemoryStore, MetricsSnapshot,
    ProviderId, ProviderRole, RemoteProvider, RequestKind, SinkConfig, Strategist,
};

#[derive(Parser, Debug)]
#[command(
    name = "consensus-cli",
    about = "Score subjects with every enabled analytics provider and print the consensus"
)]
struct Cli {
    /// TOML configuration file (defaults plus CONSENSUS_* overrides when omitted)
    #[arg(long, env = "CONSENSUS_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// JSON map of subject id to stats, activity and transactions
    #[arg(long, env = "CONSENSUS_FIXTURES", value_name = "PATH")]
    fixtures: PathBuf,

    /// Subjects to evaluate
    #[arg(long = "subject", value_name = "ID", num_args = 1.., value_delimiter = ',', required = true)]
    subjects: Vec<String>,

    /// Context (match, session) the subjects are evaluated in
    #[arg(long, value_name = "ID")]
    context: String,

    /// comprehensive, fraud_only or strategic_only
    #[arg(long, default_value = "comprehensive")]
    kind: RequestKind,

    /// Extra remote scorer, registered and enabled as a general provider
    #[arg(long = "remote", value_name = "ID=URL", value_parser = parse_remote)]
    remotes: Vec<RemoteSpec>,

    /// Forward every fresh result to this URL
    #[arg(long, value_name = "URL")]
    forward_url: Option<String>,

    /// Evaluate each subject this many times (later rounds hit the cache)
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Include the metrics snapshot in the output
    #[arg(long)]
    metrics: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct RemoteSpec {
    id: String,
    url: String,
}

fn parse_remote(raw: &str) -> Result<RemoteSpec, String> {
    let (id, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=URL, got {raw:?}"))?;
    let (id, url) = (id.trim(), url.trim());
    if id.is_empty() || url.is_empty() {
        return Err(format!("expected ID=URL, got {raw:?}"));
    }
    Ok(RemoteSpec {
        id: id.to_string(),
        url: url.to_string(),
    })
}

#[derive(Debug, Serialize)]
struct Report {
    results: Vec<ConsensusResult>,
    errors: Vec<EvaluationError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<MetricsSnapshot>,
}

#[derive(Debug, Serialize)]
struct EvaluationError {
    subject_id: String,
    error: String,
    retriable: bool,
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::from_env().context("loading config from environment")?,
    };
    for remote in &cli.remotes {
        config.enabled_providers.insert(ProviderId::new(&remote.id));
    }
    if let Some(url) = &cli.forward_url {
        config.sink = Some(SinkConfig::new(url));
    }
    Ok(config)
}

fn build_engine(cli: &Cli, config: EngineConfig) -> Result<ConsensusEngine> {
    let raw = std::fs::read_to_string(&cli.fixtures)
        .with_context(|| format!("reading fixtures from {}", cli.fixtures.display()))?;
    let store = Arc::new(InMemoryStore::from_json(&raw).context("parsing fixtures")?);
    info!(subjects = store.len(), "fixtures loaded");

    let mut builder = ConsensusEngine::builder(config)
        .with_cached_provider(FraudGuard::new(store.clone()).with_ledger(store.clone()))
        .with_cached_provider(Strategist::new(store));
    for remote in &cli.remotes {
        let provider = RemoteProvider::new(remote.id.as_str(), ProviderRole::General, &remote.url)
            .with_context(|| format!("configuring remote provider {}", remote.id))?;
        builder = builder.with_cached_provider(provider);
    }
    builder.build().context("building consensus engine")
}

async fn run(cli: &Cli) -> Result<Report> {
    let config = load_config(cli)?;
    let engine = build_engine(cli, config)?;
    info!(
        providers = ?engine.provider_ids(),
        kind = %cli.kind,
        subjects = cli.subjects.len(),
        "evaluating"
    );

    let mut results = Vec::new();
    let mut errors = Vec::new();
    for subject in &cli.subjects {
        let mut last = None;
        for _ in 0..cli.repeat.max(1) {
            last = Some(engine.evaluate(subject, &cli.context, cli.kind).await);
        }
        match last {
            Some(Ok(result)) => results.push(result),
            Some(Err(e)) => {
                warn!(subject_id = %subject, error = %e, "evaluation failed");
                errors.push(EvaluationError {
                    subject_id: subject.clone(),
                    error: e.to_string(),
                    retriable: e.is_retriable(),
                });
            }
            None => {}
        }
    }

    let metrics = cli.metrics.then(|| engine.metrics());
    Ok(Report {
        results,
        errors,
        metrics,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let cli = Cli::parse();

    let report = run(&cli).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serializing report")?
    );

    if report.results.is_empty() {
        bail!("no subject could be evaluated");
    }
    Ok(())
}
