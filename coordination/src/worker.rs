//! One step of an analysis claim loop: claim, analyse, complete or revert.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::analysis::{validate, AnalysisError, StageAnalyzer};
use crate::incident::{AnalysisStage, IncidentId, LifecycleStatus, ReportStatus};
use crate::store::{Store, StoreError, StoreResult};

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StepOutcome {
    /// Nothing eligible, or another worker won the claim.
    Idle,
    Completed {
        incident_id: IncidentId,
        status: ReportStatus,
    },
    Reverted {
        incident_id: IncidentId,
        status: ReportStatus,
        error: String,
    },
    /// The claim was reaped while the analysis ran; the result was dropped.
    Lost { incident_id: IncidentId },
}

pub struct ClaimWorker {
    store: Store,
    analyzer: Arc<dyn StageAnalyzer>,
    timeout: Duration,
    max_attempts: u32,
}

impl ClaimWorker {
    pub fn new(
        store: Store,
        analyzer: Arc<dyn StageAnalyzer>,
        timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            analyzer,
            timeout,
            max_attempts,
        }
    }

    pub fn stage(&self) -> AnalysisStage {
        self.analyzer.stage()
    }

    /// Claim and process at most one incident.
    ///
    /// Analysis failures never escape: they revert the claim and come back
    /// as [`StepOutcome::Reverted`]. Only store failures are errors.
    pub async fn run_once(&self) -> StoreResult<StepOutcome> {
        let stage = self.stage();
        let Some(claim) = self.store.blocking(move |s| s.claim_for_analysis(stage)).await? else {
            return Ok(StepOutcome::Idle);
        };
        let id = claim.incident.id.clone();
        tracing::debug!(incident_id = %id, stage = %stage, from = claim.claimed_from.as_str(), "Claimed");

        let result = match tokio::time::timeout(self.timeout, self.analyzer.analyze(&claim.incident)).await {
            Ok(result) => result.and_then(|output| validate(stage, output)),
            Err(_) => Err(AnalysisError::Timeout(self.timeout)),
        };

        match result {
            Ok(output) => {
                let incident_id = id.clone();
                let completed = self
                    .store
                    .blocking(move |s| s.complete_analysis(&incident_id, &output))
                    .await;
                match completed {
                    Ok(incident) => {
                        let status = match incident.status {
                            LifecycleStatus::Report(s) => s,
                            _ => stage.completed_status(),
                        };
                        tracing::info!(incident_id = %id, stage = %stage, status = status.as_str(), "Analysis complete");
                        Ok(StepOutcome::Completed {
                            incident_id: id,
                            status,
                        })
                    }
                    Err(StoreError::InvalidState(reason)) => {
                        tracing::warn!(incident_id = %id, stage = %stage, %reason, "Claim lost before completion");
                        Ok(StepOutcome::Lost { incident_id: id })
                    }
                    Err(e) => Err(e),
                }
            }
            Err(error) => {
                let reason = error.to_string();
                let (incident_id, why, max_attempts) = (id.clone(), reason.clone(), self.max_attempts);
                let reverted = self
                    .store
                    .blocking(move |s| s.revert_analysis(&incident_id, stage, &why, max_attempts))
                    .await;
                match reverted {
                    Ok(status) => {
                        tracing::warn!(
                            incident_id = %id,
                            stage = %stage,
                            error = %reason,
                            status = status.as_str(),
                            "Analysis failed, claim reverted"
                        );
                        Ok(StepOutcome::Reverted {
                            incident_id: id,
                            status,
                            error: reason,
                        })
                    }
                    Err(StoreError::InvalidState(_)) => Ok(StepOutcome::Lost { incident_id: id }),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{Incident, MediaKind, MediaRef, SourceChannel, VisionResult};
    use crate::store::test_support::temp_store;
    use crate::store::StageOutput;
    use async_trait::async_trait;

    enum Behaviour {
        Tag(&'static str),
        Fail,
        Hang,
    }

    struct FakeVision(Behaviour);

    #[async_trait]
    impl StageAnalyzer for FakeVision {
        fn stage(&self) -> AnalysisStage {
            AnalysisStage::Vision
        }

        async fn analyze(&self, _incident: &Incident) -> Result<StageOutput, AnalysisError> {
            match self.0 {
                Behaviour::Tag(tag) => Ok(StageOutput::Vision(VisionResult {
                    tag: tag.into(),
                    confidence: 0.9,
                })),
                Behaviour::Fail => Err(AnalysisError::Transport("connection reset".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(AnalysisError::Transport("unreachable".into()))
                }
            }
        }
    }

    fn worker(store: &Store, behaviour: Behaviour) -> ClaimWorker {
        ClaimWorker::new(
            store.clone(),
            Arc::new(FakeVision(behaviour)),
            Duration::from_millis(50),
            3,
        )
    }

    fn photo(store: &Store) -> Incident {
        let report = Incident::new_report(SourceChannel::Photo, "").with_media(MediaRef {
            url: "https://media.example/a.jpg".into(),
            kind: MediaKind::Image,
        });
        store.insert_incident(&report).unwrap();
        report
    }

    #[tokio::test]
    async fn test_success_advances_status() {
        let (_dir, store) = temp_store();
        let report = photo(&store);

        let outcome = worker(&store, Behaviour::Tag("fire")).run_once().await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Completed {
                incident_id: report.id.clone(),
                status: ReportStatus::AnalyzedVisual
            }
        );
        assert_eq!(
            worker(&store, Behaviour::Tag("fire")).run_once().await.unwrap(),
            StepOutcome::Idle
        );
    }

    #[tokio::test]
    async fn test_failure_restores_pre_claim_status() {
        let (_dir, store) = temp_store();
        let report = photo(&store);

        let outcome = worker(&store, Behaviour::Fail).run_once().await.unwrap();
        assert!(matches!(outcome, StepOutcome::Reverted { status: ReportStatus::Pending, .. }));

        let loaded = store.require_incident(&report.id).unwrap();
        assert_eq!(loaded.status, LifecycleStatus::Report(ReportStatus::Pending));
        assert!(loaded.vision_result.is_none());
        assert_eq!(loaded.analysis_attempts, 1);
        assert!(loaded.last_error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let (_dir, store) = temp_store();
        let report = photo(&store);

        let outcome = worker(&store, Behaviour::Hang).run_once().await.unwrap();
        match outcome {
            StepOutcome::Reverted { error, status, .. } => {
                assert!(error.contains("timed out"));
                assert_eq!(status, ReportStatus::Pending);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let loaded = store.require_incident(&report.id).unwrap();
        assert!(loaded.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_invalid_answer_is_reverted() {
        let (_dir, store) = temp_store();
        photo(&store);
        let outcome = worker(&store, Behaviour::Tag("  ")).run_once().await.unwrap();
        assert!(matches!(outcome, StepOutcome::Reverted { .. }));
    }
}
