//! External analysis stages (vision, audio transcription, severity).
//!
//! The models themselves live behind [`StageAnalyzer`]; this module owns
//! the error taxonomy and the range checks every answer must pass before
//! it is written to an incident.

use std::time::Duration;

use async_trait::async_trait;

use crate::incident::{AnalysisStage, Incident, SeverityResult, VisionResult};
use crate::store::StageOutput;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("analysis service unreachable: {0}")]
    Transport(String),

    #[error("unparseable analysis response: {0}")]
    Unparseable(String),

    #[error("analysis value out of range: {0}")]
    OutOfRange(String),

    #[error("incident has no {0} to analyse")]
    MissingInput(&'static str),
}

/// One external analysis service.
#[async_trait]
pub trait StageAnalyzer: Send + Sync {
    fn stage(&self) -> AnalysisStage;

    /// Analyse a claimed incident. The returned output must belong to
    /// [`StageAnalyzer::stage`].
    async fn analyze(&self, incident: &Incident) -> Result<StageOutput, AnalysisError>;
}

/// Reject answers the store must never hold.
pub fn validate(stage: AnalysisStage, output: StageOutput) -> Result<StageOutput, AnalysisError> {
    if output.stage() != stage {
        return Err(AnalysisError::Unparseable(format!(
            "{stage} analyzer returned a {} result",
            output.stage()
        )));
    }
    match &output {
        StageOutput::Vision(v) => validate_vision(v)?,
        StageOutput::Transcript(t) if t.trim().is_empty() => {
            return Err(AnalysisError::Unparseable("empty transcript".into()))
        }
        StageOutput::Transcript(_) => {}
        StageOutput::Severity(s) => validate_severity(s)?,
    }
    Ok(output)
}

fn validate_vision(v: &VisionResult) -> Result<(), AnalysisError> {
    if v.tag.trim().is_empty() {
        return Err(AnalysisError::Unparseable("empty vision tag".into()));
    }
    if !(0.0..=1.0).contains(&v.confidence) {
        return Err(AnalysisError::OutOfRange(format!(
            "confidence {} not in [0, 1]",
            v.confidence
        )));
    }
    Ok(())
}

fn validate_severity(s: &SeverityResult) -> Result<(), AnalysisError> {
    if !(1..=10).contains(&s.severity) {
        return Err(AnalysisError::OutOfRange(format!(
            "severity {} not in 1..=10",
            s.severity
        )));
    }
    Ok(())
}
