//! Surgecast — Binary Entrypoint
//! Loads a JSONL event dump into the in-memory store, runs one batch over
//! every topic found in it and prints the leaderboard with insights,
//! alerts and the emerging-topics shortlist.
//!
//! Usage: `surgecast <events.jsonl> [--force]`

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use surgecast::config::PipelineConfig;
use surgecast::pipeline::SurgePipeline;
use surgecast::ranker;
use surgecast::store::MemoryStore;
use surgecast::types::{SignalEvent, TopicRef};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("surgecast=info,warn"));
    let json = std::env::var("SURGECAST_LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

fn load_events(path: &str) -> Result<Vec<SignalEvent>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let mut events = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: SignalEvent = serde_json::from_str(line)
            .with_context(|| format!("{path}:{} is not a valid event", lineno + 1))?;
        events.push(event);
    }
    Ok(events)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op elsewhere. This enables
    // SURGECAST_CONFIG / RUST_LOG from .env before anything reads them.
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let force_rebuild = args.iter().any(|a| a == "--force");
    let Some(events_path) = args.iter().find(|a| !a.starts_with("--")) else {
        bail!("usage: surgecast <events.jsonl> [--force]");
    };

    let config = PipelineConfig::load_default()?;
    let events = load_events(events_path)?;
    if events.is_empty() {
        bail!("{events_path} contains no events");
    }

    let topic_ids: BTreeSet<String> = events.iter().map(|e| e.topic_id.clone()).collect();
    let topics: Vec<TopicRef> = topic_ids
        .into_iter()
        .map(|id| TopicRef::new(id.clone(), id))
        .collect();
    tracing::info!(
        events = events.len(),
        topics = topics.len(),
        "loaded event dump"
    );

    let store = Arc::new(MemoryStore::new());
    store.seed_events(events).await;
    let pipeline = SurgePipeline::new(config, store.clone(), store.clone(), store);

    let report = pipeline.run_batch(&topics, force_rebuild).await;
    println!(
        "batch: {} topics, {} failed, {} feature rows, {} forecasts",
        report.topics_processed,
        report.topics_failed,
        report.features_built,
        report.forecasts_written
    );
    for outcome in report.outcomes.iter().filter(|o| o.error.is_some()) {
        println!(
            "  {}: {}",
            outcome.topic_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    let horizon = pipeline
        .config()
        .forecast_horizons
        .first()
        .copied()
        .unwrap_or(30);
    let board = pipeline.leaderboard(&topics, horizon, 20).await?;

    println!("\nleaderboard ({horizon}d horizon):");
    for entry in &board {
        println!(
            "  #{:<3} {:<30} score {:.3}  surge {:.3}  conf {:.3}  growth {:+.1}%  ({})",
            entry.rank,
            entry.topic.name,
            entry.ranking_score,
            entry.surge_score,
            entry.confidence_score,
            entry.growth_rate * 100.0,
            entry.model_type
        );
    }

    if let Some(top) = board.first() {
        if let Some(stats) = pipeline.topic_summary(&top.topic.id).await? {
            println!(
                "\n{} series: {:.0} events total, {:.1}/day avg, {:.0}/day peak, \
                 velocity {:+.2}, trend {:.2}, volatility {:.2}, {} change points",
                top.topic.name,
                stats.total_events,
                stats.avg_daily_events,
                stats.max_daily_events,
                stats.current_velocity,
                stats.trend_strength,
                stats.avg_volatility,
                stats.change_point_count
            );
        }
    }

    let insights = ranker::insights(&board);
    println!(
        "\ninsights: avg surge {:.3}, max {:.3}, avg confidence {:.3}, {} high-confidence",
        insights.avg_surge,
        insights.max_surge,
        insights.avg_confidence,
        insights.high_confidence_count
    );

    for alert in pipeline.alerts(&board) {
        println!("alert [{}/{}]: {}", alert.severity, alert.kind, alert.message);
    }

    let emerging = pipeline.emerging(&topics).await?;
    if !emerging.is_empty() {
        println!("\nemerging topics:");
        for e in &emerging {
            println!(
                "  {:<30} surge {:.3}  emergence {:.3}",
                e.topic.name, e.surge_score, e.emergence_score
            );
        }
    }

    Ok(())
}
