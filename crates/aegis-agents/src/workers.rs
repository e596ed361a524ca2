//! Polling loops: one per analysis stage, the dispatch loop, and the
//! claim-lease reaper.
//!
//! Every loop shares the same shape. Check the cycle budget and the
//! cancellation token at the top of each pass, run one step, and sleep
//! only when the step found nothing to do. An in-flight step is always
//! allowed to finish before cancellation is honoured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::dispatch::{DispatchPipeline, PipelineResult};
use coordination::notify::StationNotifier;
use coordination::store::Store;
use coordination::worker::{ClaimWorker, StepOutcome};
use tokio_util::sync::CancellationToken;

/// One unit of loop work.
#[async_trait]
pub trait PollStep: Send + Sync {
    fn name(&self) -> String;

    /// Run one pass. `Ok(true)` when something was processed, in which
    /// case the loop polls again immediately.
    async fn step(&self) -> anyhow::Result<bool>;
}

/// Counters reported when a loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub processed: u64,
    pub errors: u64,
}

/// Drive `step` until cancelled or until `max_cycles` passes (0 = unbounded).
pub async fn run_loop(
    step: &dyn PollStep,
    interval: Duration,
    max_cycles: u64,
    cancel: Arc<CancellationToken>,
) -> LoopStats {
    let name = step.name();
    let mut stats = LoopStats::default();
    tracing::info!(worker = %name, ?interval, max_cycles, "Loop started");

    loop {
        if max_cycles > 0 && stats.cycles >= max_cycles {
            tracing::info!(worker = %name, cycles = stats.cycles, "Cycle budget reached");
            break;
        }
        if cancel.is_cancelled() {
            break;
        }
        stats.cycles += 1;

        let worked = match step.step().await {
            Ok(worked) => worked,
            Err(e) => {
                stats.errors += 1;
                tracing::error!(worker = %name, error = %e, "Loop step failed");
                false
            }
        };
        if worked {
            stats.processed += 1;
            continue;
        }
        if max_cycles > 0 && stats.cycles >= max_cycles {
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!(
        worker = %name,
        cycles = stats.cycles,
        processed = stats.processed,
        errors = stats.errors,
        "Loop stopped"
    );
    stats
}

/// Vision, audio or severity claim loop.
pub struct AnalysisStep {
    worker: ClaimWorker,
}

impl AnalysisStep {
    pub fn new(worker: ClaimWorker) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl PollStep for AnalysisStep {
    fn name(&self) -> String {
        format!("{}-worker", self.worker.stage())
    }

    async fn step(&self) -> anyhow::Result<bool> {
        let outcome = self.worker.run_once().await?;
        Ok(!matches!(outcome, StepOutcome::Idle))
    }
}

/// The logistics loop: one dispatch-ready incident per pass.
pub struct DispatchStep<N> {
    pipeline: DispatchPipeline<N>,
}

impl<N> DispatchStep<N> {
    pub fn new(pipeline: DispatchPipeline<N>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl<N: StationNotifier + 'static> PollStep for DispatchStep<N> {
    fn name(&self) -> String {
        "dispatch-worker".to_string()
    }

    async fn step(&self) -> anyhow::Result<bool> {
        let Some(outcome) = self.pipeline.dispatch_next().await? else {
            return Ok(false);
        };
        match &outcome.result {
            PipelineResult::Assigned { report, mission_id } => tracing::info!(
                incident_id = %outcome.incident_id,
                emergency_type = outcome.emergency_type.as_str(),
                alert_id = %report.alert_id,
                delivered = report.delivered(),
                targeted = report.deliveries.len(),
                mission_id = mission_id.as_deref().unwrap_or("-"),
                rerouted = outcome.rerouted,
                "Incident dispatched"
            ),
            PipelineResult::NoStationsAvailable { alert_id } => tracing::warn!(
                incident_id = %outcome.incident_id,
                emergency_type = outcome.emergency_type.as_str(),
                %alert_id,
                "No stations available"
            ),
            PipelineResult::NoLocationData => tracing::warn!(
                incident_id = %outcome.incident_id,
                "Incident has no location, parked"
            ),
            PipelineResult::Superseded { alert_id } => tracing::info!(
                incident_id = %outcome.incident_id,
                alert_id = alert_id.as_deref().unwrap_or("-"),
                "Dispatch pass superseded"
            ),
        }
        Ok(true)
    }
}

/// Reverts claims whose worker never came back.
pub struct ReaperStep {
    store: Store,
    lease: Duration,
    max_attempts: u32,
}

impl ReaperStep {
    pub fn new(store: Store, lease: Duration, max_attempts: u32) -> Self {
        Self {
            store,
            lease,
            max_attempts,
        }
    }
}

#[async_trait]
impl PollStep for ReaperStep {
    fn name(&self) -> String {
        "reaper".to_string()
    }

    async fn step(&self) -> anyhow::Result<bool> {
        let lease = chrono::Duration::from_std(self.lease)?;
        let max_attempts = self.max_attempts;
        let released = self
            .store
            .blocking(move |s| s.release_stale_claims(lease, max_attempts))
            .await?;
        for (incident_id, status) in released {
            tracing::warn!(%incident_id, %status, "Released stale claim");
        }
        // the reaper always waits a full interval between sweeps
        Ok(false)
    }
}
