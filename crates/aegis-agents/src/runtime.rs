//! Wiring: turns an [`AegisConfig`] into a running server and loops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use coordination::dispatch::{AlertDispatcher, DispatchPipeline};
use coordination::incident::AnalysisStage;
use coordination::intake::{Geocoder, Intake};
use coordination::mission::DirectRoutePlanner;
use coordination::notify::HttpNotifier;
use coordination::store::Store;
use coordination::worker::ClaimWorker;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::analysis_client::HttpStageAnalyzer;
use crate::config::AegisConfig;
use crate::geocode::HttpGeocoder;
use crate::rate_limit::InMemoryRateLimiter;
use crate::server::{self, AppState};
use crate::workers::{run_loop, AnalysisStep, DispatchStep, LoopStats, PollStep, ReaperStep};

/// The loops `aegis-agents worker` can run on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerKind {
    Vision,
    Audio,
    Severity,
    Dispatch,
    Reaper,
}

impl WorkerKind {
    fn stage(self) -> Option<AnalysisStage> {
        match self {
            Self::Vision => Some(AnalysisStage::Vision),
            Self::Audio => Some(AnalysisStage::Audio),
            Self::Severity => Some(AnalysisStage::Severity),
            Self::Dispatch | Self::Reaper => None,
        }
    }
}

pub fn open_store(config: &AegisConfig) -> Result<Store> {
    let store = Store::open(&config.db_path)
        .with_context(|| format!("cannot open incident store at {}", config.db_path.display()))?;
    tracing::info!(path = %store.path().display(), "Incident store ready");
    Ok(store)
}

fn analysis_url(config: &AegisConfig, stage: AnalysisStage) -> Option<&str> {
    match stage {
        AnalysisStage::Vision => config.services.vision.as_deref(),
        AnalysisStage::Audio => config.services.audio.as_deref(),
        AnalysisStage::Severity => config.services.severity.as_deref(),
    }
}

fn analysis_interval(config: &AegisConfig, stage: AnalysisStage) -> Duration {
    match stage {
        AnalysisStage::Vision => config.intervals.vision,
        AnalysisStage::Audio => config.intervals.audio,
        AnalysisStage::Severity => config.intervals.severity,
    }
}

fn reaper_interval(config: &AegisConfig) -> Duration {
    (config.claim_lease / 4).max(Duration::from_secs(1))
}

/// The claim loop for `stage`, or `None` when no endpoint is configured.
pub fn analysis_step(
    config: &AegisConfig,
    store: &Store,
    stage: AnalysisStage,
) -> Result<Option<AnalysisStep>> {
    let Some(url) = analysis_url(config, stage) else {
        return Ok(None);
    };
    let analyzer = HttpStageAnalyzer::new(stage, url, config.analysis_timeout)
        .with_context(|| format!("cannot build {stage} client"))?;
    let worker = ClaimWorker::new(
        store.clone(),
        Arc::new(analyzer),
        config.analysis_timeout,
        config.max_analysis_attempts,
    );
    Ok(Some(AnalysisStep::new(worker)))
}

pub fn dispatch_step(config: &AegisConfig, store: &Store) -> Result<DispatchStep<HttpNotifier>> {
    let notifier =
        HttpNotifier::new(config.delivery_timeout).context("cannot build station notifier")?;
    let dispatcher = AlertDispatcher::new(
        store.clone(),
        notifier,
        config.origin.clone(),
        config.delivery_timeout,
    );
    let pipeline = DispatchPipeline::new(
        store.clone(),
        dispatcher,
        Arc::new(DirectRoutePlanner),
        config.max_dispatch_attempts,
    );
    Ok(DispatchStep::new(pipeline))
}

pub fn reaper_step(config: &AegisConfig, store: &Store) -> ReaperStep {
    ReaperStep::new(store.clone(), config.claim_lease, config.max_analysis_attempts)
}

pub fn app_state(config: &AegisConfig, store: &Store) -> Result<AppState> {
    let geocoder: Option<Arc<dyn Geocoder>> = match config.services.geocoder.as_deref() {
        Some(url) => Some(Arc::new(
            HttpGeocoder::new(url, config.analysis_timeout).context("cannot build geocoder")?,
        )),
        None => None,
    };
    Ok(AppState::new(
        store.clone(),
        Intake::new(store.clone(), geocoder),
        Arc::new(InMemoryRateLimiter::per_minute(config.rate_limit_per_minute)),
        config.environment,
    ))
}

/// Every loop the configuration enables, paired with its interval.
fn configured_loops(
    config: &AegisConfig,
    store: &Store,
) -> Result<Vec<(Box<dyn PollStep>, Duration)>> {
    let mut loops: Vec<(Box<dyn PollStep>, Duration)> = Vec::new();
    for &stage in AnalysisStage::all() {
        match analysis_step(config, store, stage)? {
            Some(step) => loops.push((Box::new(step), analysis_interval(config, stage))),
            None => tracing::warn!(%stage, "No endpoint configured, stage disabled"),
        }
    }
    loops.push((Box::new(dispatch_step(config, store)?), config.intervals.dispatch));
    loops.push((Box::new(reaper_step(config, store)), reaper_interval(config)));
    Ok(loops)
}

/// Run a single loop until cancelled or out of cycles.
pub async fn run_worker(
    config: &AegisConfig,
    kind: WorkerKind,
    cancel: Arc<CancellationToken>,
) -> Result<LoopStats> {
    let store = open_store(config)?;
    let (step, interval): (Box<dyn PollStep>, Duration) = match kind.stage() {
        Some(stage) => {
            let step = analysis_step(config, &store, stage)?.with_context(|| {
                format!("no endpoint configured for the {stage} stage")
            })?;
            (Box::new(step), analysis_interval(config, stage))
        }
        None if kind == WorkerKind::Dispatch => {
            (Box::new(dispatch_step(config, &store)?), config.intervals.dispatch)
        }
        None => (Box::new(reaper_step(config, &store)), reaper_interval(config)),
    };
    Ok(run_loop(step.as_ref(), interval, config.max_cycles, cancel).await)
}

/// Serve HTTP on `listener` and run every configured loop alongside it.
pub async fn serve(
    config: &AegisConfig,
    listener: tokio::net::TcpListener,
    cancel: Arc<CancellationToken>,
) -> Result<()> {
    let store = open_store(config)?;
    let state = app_state(config, &store)?;

    let mut loops = JoinSet::new();
    for (step, interval) in configured_loops(config, &store)? {
        let cancel = cancel.clone();
        let max_cycles = config.max_cycles;
        loops.spawn(async move { run_loop(step.as_ref(), interval, max_cycles, cancel).await });
    }

    let served = server::serve(listener, state, cancel.clone()).await;
    // a failed server takes the loops down with it
    cancel.cancel();
    while let Some(joined) = loops.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Loop task panicked");
        }
    }
    served
}
