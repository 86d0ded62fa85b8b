use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use common::logger::init_tracing;
use spreadguard::{
    alerts::{AlertSink, OperatorAlert},
    config::{AppConfig, SourceKind},
    db::Db,
    emitter::{ChannelEmitter, SignalEmitter},
    guard::AnomalyGuard,
    live::LiveMonitor,
    metrics::Counters,
    normalizer::PriceNormalizer,
    probe::PairProbe,
    registry::InstrumentRegistry,
    sources::{SourceAdapter, SourcePool, moex::MoexIssClient},
    spread::SpreadRecord,
    store::{SqlxStateRepository, StateStore},
    validation::ValidationScheduler,
};

#[derive(Parser, Debug)]
#[command(name = "spreadguard", about = "Cash/derivative spread monitor")]
struct Args {
    /// Path to the TOML configuration.
    #[arg(long, env = "SPREADGUARD_CONFIG", default_value = "config/spreadguard.toml")]
    config: PathBuf,
}

/// Initializes DB, runs migrations and constructs repository/store.
async fn init_store(cfg: &AppConfig) -> anyhow::Result<Arc<StateStore>> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let repo = Arc::new(SqlxStateRepository::new(db.pool.clone()));
    Ok(Arc::new(StateStore::new(repo)))
}

fn build_catalog(cfg: &AppConfig) -> anyhow::Result<Vec<(Arc<dyn SourceAdapter>, f64)>> {
    cfg.sources
        .iter()
        .map(|def| -> anyhow::Result<(Arc<dyn SourceAdapter>, f64)> {
            let adapter: Arc<dyn SourceAdapter> = match def.kind {
                SourceKind::MoexIss => Arc::new(
                    MoexIssClient::new(def.id.clone(), def.endpoint.clone())
                        .with_context(|| format!("failed to build source {}", def.id))?,
                ),
            };
            Ok((adapter, def.prior_reliability))
        })
        .collect()
}

/// Downstream of the emitter: message delivery is out of scope, so the
/// signal stream is logged here.
fn start_signal_drain(mut rx: mpsc::Receiver<SpreadRecord>) {
    tokio::spawn(async move {
        while let Some(rec) = rx.recv().await {
            info!(
                target: "signal",
                pair = %rec.pair,
                sector = ?rec.sector,
                spread_pct = rec.spread_pct,
                direction = ?rec.direction,
                urgency = ?rec.urgency,
                "signal ready for delivery"
            );
        }
    });
}

fn start_alert_drain(mut rx: mpsc::Receiver<OperatorAlert>) {
    tokio::spawn(async move {
        while let Some(alert) = rx.recv().await {
            match serde_json::to_string(&alert) {
                Ok(json) => warn!(target: "operator", alert = %json, "operator alert queued"),
                Err(e) => error!(error = %e, "failed to encode operator alert"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let args = Args::parse();
    let cfg = AppConfig::load(&args.config)?;

    init_tracing("spreadguard", cfg.json_logs);
    info!(config = %args.config.display(), "Starting spreadguard...");

    let counters = Counters::default();
    let store = init_store(&cfg).await?;

    let (alerts, alert_rx) = AlertSink::channel(cfg.emitter.alert_capacity);
    start_alert_drain(alert_rx);

    let registry = Arc::new(InstrumentRegistry::from_defs(&cfg.rules, &cfg.pairs)?);

    let pool = SourcePool::new(
        build_catalog(&cfg)?,
        cfg.pool.clone(),
        alerts.clone(),
        counters.clone(),
    )
    .with_store(store.clone());
    pool.restore(store.load_sources().await?);
    let pool = Arc::new(pool);

    let guard = AnomalyGuard::new(
        cfg.guard.clone(),
        registry.pairs().iter().map(|p| p.id.clone()),
        counters.clone(),
    )
    .with_store(store.clone());
    guard.restore(store.load_pair_statuses().await?).await;
    let guard = Arc::new(guard);

    let probe = PairProbe::new(
        pool.clone(),
        PriceNormalizer::new(registry.clone()),
        cfg.polling.staleness_window_ms,
    );

    let (emitter, signal_rx) = ChannelEmitter::channel(cfg.emitter.channel_capacity);
    start_signal_drain(signal_rx);
    let emitter: Arc<dyn SignalEmitter> = Arc::new(emitter);

    let validation = Arc::new(
        ValidationScheduler::new(
            registry.clone(),
            probe.clone(),
            guard.clone(),
            alerts,
            cfg.validation.clone(),
        )
        .with_store(store),
    );
    let sweeps = validation.spawn();

    let live = Arc::new(LiveMonitor::new(
        registry,
        probe,
        guard,
        emitter,
        cfg.polling.clone(),
        cfg.trading_hours.clone(),
        counters.clone(),
    ));
    let live_task = tokio::spawn(live.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!(counters = ?counters.snapshot(), "Shutdown signal received");

    live_task.abort();
    for h in sweeps {
        h.abort();
    }

    Ok(())
}
