//! Legal transitions for both incident axes and the analysis stages that
//! drive the primary axis.
//!
//! The primary `status` and the secondary `emergencyStatus` advance
//! independently. Every write path in the store validates its edge against
//! the tables here before issuing the conditional update.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{LifecycleStatus, NeedStatus, ReportStatus};

/// Dispatch-side status, owned by the dispatcher and response handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyStatus {
    #[default]
    None,
    Pending,
    Assigned,
    Dispatched,
    Rejected,
    Resolved,
}

impl EmergencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Dispatched => "dispatched",
            Self::Rejected => "rejected",
            Self::Resolved => "resolved",
        }
    }

    pub fn all() -> &'static [EmergencyStatus] {
        &[
            Self::None,
            Self::Pending,
            Self::Assigned,
            Self::Dispatched,
            Self::Rejected,
            Self::Resolved,
        ]
    }

    /// Whether matching may (re)start from this status.
    pub fn awaiting_dispatch(&self) -> bool {
        matches!(self, Self::None | Self::Pending | Self::Rejected)
    }
}

impl fmt::Display for EmergencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmergencyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown emergency status '{s}'"))
    }
}

/// Error returned when a write would take an illegal edge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal {axis} transition: {from} → {to}")]
pub struct IllegalTransition {
    pub axis: &'static str,
    pub from: String,
    pub to: String,
}

/// Legal edges of the primary status.
///
/// ```text
/// Pending → Processing_Visual | Processing_Audio | Processing_Oracle
/// Processing_Visual → Analyzed_Visual | Pending | Error
/// Processing_Audio → Pending_Transcription | Pending | Error
/// Analyzed_Visual | Pending_Transcription → Processing_Oracle
/// Processing_Oracle → Analyzed_Full | <claimed-from> | Error
/// Analyzed_Full → Clustered
/// Clustered → Resolved | Analyzed_Full
/// Error → Pending
///
/// Unverified → Verified | Flagged
/// Verified → InProgress | Flagged
/// InProgress → Completed | Verified
/// Flagged → Verified
/// ```
pub fn is_legal_status_transition(from: LifecycleStatus, to: LifecycleStatus) -> bool {
    match (from, to) {
        (LifecycleStatus::Report(from), LifecycleStatus::Report(to)) => {
            is_legal_report_transition(from, to)
        }
        (LifecycleStatus::Need(from), LifecycleStatus::Need(to)) => {
            is_legal_need_transition(from, to)
        }
        // An incident never changes kind.
        _ => false,
    }
}

fn is_legal_report_transition(from: ReportStatus, to: ReportStatus) -> bool {
    use ReportStatus::*;

    // Any analysis stage may give up.
    if to == Error && from.is_processing() {
        return true;
    }

    matches!(
        (from, to),
        (Pending, ProcessingVisual)
            | (Pending, ProcessingAudio)
            | (Pending, ProcessingOracle)
            | (ProcessingVisual, AnalyzedVisual)
            | (ProcessingVisual, Pending)
            | (ProcessingAudio, PendingTranscription)
            | (ProcessingAudio, Pending)
            | (AnalyzedVisual, ProcessingOracle)
            | (PendingTranscription, ProcessingOracle)
            | (ProcessingOracle, AnalyzedFull)
            // reverts back to whichever status the oracle claimed from
            | (ProcessingOracle, AnalyzedVisual)
            | (ProcessingOracle, PendingTranscription)
            | (ProcessingOracle, Pending)
            | (AnalyzedFull, Clustered)
            | (Clustered, Resolved)
            | (Clustered, AnalyzedFull)
            | (Error, Pending)
    )
}

fn is_legal_need_transition(from: NeedStatus, to: NeedStatus) -> bool {
    use NeedStatus::*;

    matches!(
        (from, to),
        (Unverified, Verified)
            | (Unverified, Flagged)
            | (Verified, InProgress)
            | (Verified, Flagged)
            | (InProgress, Completed)
            | (InProgress, Verified)
            | (Flagged, Verified)
    )
}

/// Legal edges of the dispatch-side status.
///
/// ```text
/// none → pending | assigned
/// pending → pending | assigned
/// rejected → pending | assigned
/// assigned → dispatched | rejected | resolved | pending
/// dispatched → dispatched | rejected | resolved | pending
/// ```
///
/// `assigned` is only entered by a dispatch that targeted at least one
/// station. The `→ pending` edges out of `assigned`/`dispatched` belong to
/// manual reroute.
pub fn is_legal_emergency_transition(from: EmergencyStatus, to: EmergencyStatus) -> bool {
    use EmergencyStatus::*;

    matches!(
        (from, to),
        (None, Pending)
            | (None, Assigned)
            | (Pending, Pending)
            | (Pending, Assigned)
            | (Rejected, Pending)
            | (Rejected, Assigned)
            | (Assigned, Dispatched)
            | (Assigned, Rejected)
            | (Assigned, Resolved)
            | (Assigned, Pending)
            | (Dispatched, Dispatched)
            | (Dispatched, Rejected)
            | (Dispatched, Resolved)
            | (Dispatched, Pending)
    )
}

pub fn check_status_transition(
    from: LifecycleStatus,
    to: LifecycleStatus,
) -> Result<(), IllegalTransition> {
    if is_legal_status_transition(from, to) {
        Ok(())
    } else {
        Err(IllegalTransition {
            axis: "status",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

pub fn check_emergency_transition(
    from: EmergencyStatus,
    to: EmergencyStatus,
) -> Result<(), IllegalTransition> {
    if is_legal_emergency_transition(from, to) {
        Ok(())
    } else {
        Err(IllegalTransition {
            axis: "emergencyStatus",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// One of the analysis stages that claim reports exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    Vision,
    Audio,
    /// Severity assessment, the last stage before a report is analyzed.
    Severity,
}

impl AnalysisStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::Audio => "audio",
            Self::Severity => "severity",
        }
    }

    pub fn all() -> &'static [AnalysisStage] {
        &[Self::Vision, Self::Audio, Self::Severity]
    }

    /// Private status held while a worker of this stage owns the report.
    pub fn processing_status(&self) -> ReportStatus {
        match self {
            Self::Vision => ReportStatus::ProcessingVisual,
            Self::Audio => ReportStatus::ProcessingAudio,
            Self::Severity => ReportStatus::ProcessingOracle,
        }
    }

    /// Statuses a report may be claimed from.
    pub fn eligible_from(&self) -> &'static [ReportStatus] {
        match self {
            Self::Vision | Self::Audio => &[ReportStatus::Pending],
            Self::Severity => &[
                ReportStatus::AnalyzedVisual,
                ReportStatus::PendingTranscription,
                ReportStatus::Pending,
            ],
        }
    }

    /// Forward status written together with the stage result.
    pub fn completed_status(&self) -> ReportStatus {
        match self {
            Self::Vision => ReportStatus::AnalyzedVisual,
            Self::Audio => ReportStatus::PendingTranscription,
            Self::Severity => ReportStatus::AnalyzedFull,
        }
    }

    /// Stage that owns a given processing status, if any.
    pub fn owning(status: ReportStatus) -> Option<AnalysisStage> {
        Self::all()
            .iter()
            .copied()
            .find(|stage| stage.processing_status() == status)
    }
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vision" => Ok(Self::Vision),
            "audio" => Ok(Self::Audio),
            "severity" | "oracle" => Ok(Self::Severity),
            other => Err(format!("unknown analysis stage '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: ReportStatus) -> LifecycleStatus {
        LifecycleStatus::Report(s)
    }

    fn n(s: NeedStatus) -> LifecycleStatus {
        LifecycleStatus::Need(s)
    }

    #[test]
    fn test_every_stage_round_trips_through_its_processing_status() {
        for stage in AnalysisStage::all() {
            let processing = r(stage.processing_status());
            for from in stage.eligible_from() {
                assert!(is_legal_status_transition(r(*from), processing));
                assert!(
                    is_legal_status_transition(processing, r(*from)),
                    "{stage} must be able to revert to {from:?}"
                );
            }
            assert!(is_legal_status_transition(
                processing,
                r(stage.completed_status())
            ));
            assert!(is_legal_status_transition(processing, r(ReportStatus::Error)));
        }
    }

    #[test]
    fn test_report_cannot_skip_analysis() {
        assert!(!is_legal_status_transition(
            r(ReportStatus::Pending),
            r(ReportStatus::AnalyzedFull)
        ));
        assert!(!is_legal_status_transition(
            r(ReportStatus::AnalyzedVisual),
            r(ReportStatus::Clustered)
        ));
        assert!(!is_legal_status_transition(
            r(ReportStatus::Pending),
            r(ReportStatus::Error)
        ));
    }

    #[test]
    fn test_resolved_is_terminal() {
        for to in ReportStatus::all() {
            assert!(!is_legal_status_transition(r(ReportStatus::Resolved), r(*to)));
        }
        for to in NeedStatus::all() {
            assert!(!is_legal_status_transition(n(NeedStatus::Completed), n(*to)));
        }
    }

    #[test]
    fn test_kind_never_changes() {
        assert!(!is_legal_status_transition(
            r(ReportStatus::AnalyzedFull),
            n(NeedStatus::InProgress)
        ));
    }

    #[test]
    fn test_need_flow() {
        assert!(check_status_transition(n(NeedStatus::Unverified), n(NeedStatus::Verified)).is_ok());
        assert!(check_status_transition(n(NeedStatus::Verified), n(NeedStatus::InProgress)).is_ok());
        assert!(check_status_transition(n(NeedStatus::InProgress), n(NeedStatus::Completed)).is_ok());
        let err = check_status_transition(n(NeedStatus::Flagged), n(NeedStatus::InProgress))
            .unwrap_err();
        assert_eq!(err.axis, "status");
        assert_eq!(err.from, "Flagged");
    }

    #[test]
    fn test_emergency_status_reaches_assigned_only_from_waiting_states() {
        for from in EmergencyStatus::all() {
            let legal = is_legal_emergency_transition(*from, EmergencyStatus::Assigned);
            assert_eq!(legal, from.awaiting_dispatch(), "from {from}");
        }
    }

    #[test]
    fn test_emergency_resolved_is_terminal() {
        for to in EmergencyStatus::all() {
            assert!(check_emergency_transition(EmergencyStatus::Resolved, *to).is_err());
        }
        assert!(!is_legal_emergency_transition(
            EmergencyStatus::None,
            EmergencyStatus::Dispatched
        ));
    }

    #[test]
    fn test_stage_parsing_accepts_oracle_alias() {
        assert_eq!("oracle".parse::<AnalysisStage>(), Ok(AnalysisStage::Severity));
        assert_eq!(
            AnalysisStage::owning(ReportStatus::ProcessingAudio),
            Some(AnalysisStage::Audio)
        );
        assert_eq!(AnalysisStage::owning(ReportStatus::Pending), None);
    }
}
