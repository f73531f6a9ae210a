//! Cerberus Context Engine
//!
//! Long-running service that keeps enriched context bundles fresh:
//! - Background pool for cache repopulation and warm-up
//! - Periodic sweep of expired durable cache entries
//! - Prometheus metrics endpoint
//!
//! One-shot commands (`build`, `warm`, `sequences`, `graph`, `facts`,
//! `event`, `stats`) run against the same stores and exit.

use anyhow::{bail, Context as _};
use cerberus_common::{
    cache::CacheConfig,
    config::{AppConfig, ObservabilityConfig},
    db::DbPool,
    metrics::{self, BUILD_BUCKETS, METRICS_PREFIX},
    Cache, SharedCache, VERSION,
};
use cerberus_context::{
    render, BackgroundWorker, ContextCache, ContextCacheConfig, ContextOrchestrator, ContextStores,
    PgContextStore,
};
use chrono::Utc;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.observability);

    info!(service = %config.observability.service_name, "Starting Cerberus Context Engine v{}", VERSION);

    metrics::register_metrics();
    if config.observability.metrics_port > 0 {
        install_metrics_exporter(config.observability.metrics_port)?;
        info!(port = config.observability.metrics_port, "Metrics exporter listening");
    }

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    db.ping().await?;
    let stores = ContextStores::from_store(Arc::new(PgContextStore::new(db)));

    let shared: Option<Arc<dyn SharedCache>> = match &config.redis {
        Some(redis) => match connect_redis(CacheConfig::from(redis)).await {
            Ok(cache) => {
                info!("Connected to Redis");
                Some(Arc::new(cache))
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, continuing without the shared cache tier");
                None
            }
        },
        None => None,
    };

    let worker = Arc::new(BackgroundWorker::new(
        config.context.worker_count,
        config.context.worker_queue_capacity,
    ));

    let mut cache = ContextCache::new(stores.catalog.clone(), ContextCacheConfig::from(&config.context))
        .with_durable(stores.cache.clone())
        .with_worker(worker.clone());
    if let Some(shared) = shared {
        cache = cache.with_shared(shared);
    }
    let cache = Arc::new(cache);

    let orchestrator = Arc::new(ContextOrchestrator::new(
        &stores,
        &config.context,
        Some(cache.clone()),
        Some(worker.clone()),
    )?);

    info!(
        token_budget = config.context.token_budget,
        workers = config.context.worker_count,
        caching = config.context.enable_caching,
        "Context orchestrator initialized"
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    let outcome = match args.first().map(String::as_str) {
        None | Some("serve") => serve(&config, &cache, &worker).await,
        Some(command) => run_command(command, &args[1..], &orchestrator, &cache).await,
    };

    if !worker.shutdown(config.context.shutdown_timeout()).await {
        warn!("Background tasks did not finish before the shutdown timeout");
    }
    info!("Context engine shutting down");
    outcome
}

async fn connect_redis(config: CacheConfig) -> cerberus_common::Result<Cache> {
    let cache = Cache::new(config).await?;
    cache.ping().await?;
    Ok(cache)
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_context_build_duration_seconds", METRICS_PREFIX)),
            BUILD_BUCKETS,
        )?
        .install()
        .context("Failed to install Prometheus exporter")
}

/// Sweep expired entries until a shutdown signal arrives
async fn serve(config: &AppConfig, cache: &Arc<ContextCache>, worker: &Arc<BackgroundWorker>) -> anyhow::Result<()> {
    if let Some(mut failures) = worker.take_failures().await {
        tokio::spawn(async move {
            while let Some(failure) = failures.recv().await {
                warn!(
                    task = %failure.name,
                    code = failure.code.map(|code| code.as_code()),
                    transient = failure.transient,
                    error = %failure.error,
                    "Background task failed"
                );
            }
        });
    }

    let mut sweep = tokio::time::interval(config.context.sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let signal = shutdown_signal();
    tokio::pin!(signal);

    info!(
        sweep_interval_secs = config.context.sweep_interval().as_secs(),
        "Context engine ready"
    );

    loop {
        tokio::select! {
            _ = &mut signal => {
                info!("Shutdown signal received");
                break;
            }
            _ = sweep.tick() => {
                match cache.sweep().await {
                    Ok(deleted) if deleted > 0 => info!(deleted, "Swept expired context entries"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Cache sweep failed"),
                }
                let stats = worker.stats();
                tracing::debug!(
                    queued = stats.queued,
                    completed = stats.completed,
                    failed = stats.failed,
                    "Worker pool status"
                );
            }
        }
    }

    Ok(())
}

async fn run_command(
    command: &str,
    args: &[String],
    orchestrator: &Arc<ContextOrchestrator>,
    cache: &Arc<ContextCache>,
) -> anyhow::Result<()> {
    match command {
        "build" => {
            let artifact_id = parse_id(args.first(), "artifact_id")?;
            let budget = parse_number(args.get(1), 0)?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let context = orchestrator.build_for_id(artifact_id, budget, &cancel).await?;
            let rendered = render(&context, Utc::now());

            println!("{}", rendered.summary);
            for (title, body) in [
                ("Related artifacts", &rendered.related_artifacts),
                ("Key people", &rendered.key_people),
                ("Timeline", &rendered.timeline),
                ("Aggregated facts", &rendered.facts),
            ] {
                if !body.is_empty() {
                    println!("\n## {}\n{}", title, body);
                }
            }
            println!(
                "\nTokens: {}/{}{}",
                context.estimated_tokens,
                context.token_budget,
                if context.was_truncated { " (truncated)" } else { "" }
            );
        }
        "warm" => {
            let program_id = parse_id(args.first(), "program_id")?;
            let limit = parse_number(args.get(1), 50)?;
            let queued = orchestrator.warm(program_id, limit).await?;
            println!("Queued {} artifacts for warm-up", queued);
        }
        "sequences" => {
            let program_id = parse_id(args.first(), "program_id")?;
            let sequences = orchestrator.timeline().refresh_sequences(program_id).await?;
            println!("{}", serde_json::to_string_pretty(&sequences)?);
        }
        "graph" => {
            let artifact_id = parse_id(args.first(), "artifact_id")?;
            let edges = orchestrator.entity_graph().update_graph(artifact_id).await?;
            println!("Updated {} relationships", edges);
        }
        "facts" => {
            let program_id = parse_id(args.first(), "program_id")?;
            let Some(key) = args.get(1) else {
                bail!("usage: context facts <program_id> <key>");
            };
            let facts = orchestrator.facts().find_related_facts(program_id, key).await?;
            println!("{}", serde_json::to_string_pretty(&facts)?);
        }
        "event" => {
            let Some(event) = args.first() else {
                bail!("usage: context event <event> <program_id>");
            };
            let program_id = parse_id(args.get(1), "program_id")?;
            let removed = cache.on_event(event, program_id).await?;
            println!("Invalidated {} cached contexts", removed);
        }
        "stats" => {
            let program_id = parse_id(args.first(), "program_id")?;
            let (graph, people, facts) = tokio::try_join!(
                orchestrator.entity_graph().stats(program_id),
                orchestrator.entity_graph().key_people(program_id, 10),
                orchestrator.facts().fact_stats(program_id),
            )?;
            let report = serde_json::json!({
                "entity_graph": graph,
                "key_people": people,
                "facts": facts,
                "cache": cache.stats().await,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        other => bail!(
            "unknown command '{}' (expected serve, build, warm, sequences, graph, facts, event or stats)",
            other
        ),
    }
    Ok(())
}

fn parse_id(arg: Option<&String>, name: &str) -> anyhow::Result<Uuid> {
    let raw = arg.with_context(|| format!("missing {}", name))?;
    Uuid::parse_str(raw).with_context(|| format!("invalid {}: {}", name, raw))
}

fn parse_number(arg: Option<&String>, default: usize) -> anyhow::Result<usize> {
    match arg {
        Some(raw) => raw.parse().with_context(|| format!("invalid number: {}", raw)),
        None => Ok(default),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
