//! Incident records: the Report and Need kinds, their statuses, and the
//! agent-output sub-fields written by the analysis stages.
//!
//! Both kinds live in one record type. The kind-specific part is carried by
//! [`LifecycleStatus`] (a tagged union over [`ReportStatus`] and
//! [`NeedStatus`]) plus the optional triage block on needs, so classification
//! and dispatch work on a single projection instead of one code path per kind.

pub mod lifecycle;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::DispatchInfo;
use crate::geo::GeoPoint;
use crate::station::{StationId, StationRef, StationType};

pub use lifecycle::{AnalysisStage, EmergencyStatus, IllegalTransition};

/// Unique identifier for incidents
pub type IncidentId = String;

/// Which of the two record kinds an incident is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// Citizen report (photo, audio, SMS, app) analysed by the AI stages.
    Report,
    /// Structured request for help, triaged externally and verified by people.
    Need,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Need => "need",
        }
    }
}

impl std::str::FromStr for IncidentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "report" => Ok(Self::Report),
            "need" => Ok(Self::Need),
            other => Err(format!("unknown incident kind '{other}'")),
        }
    }
}

/// Intake channel the incident arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceChannel {
    Photo,
    Audio,
    Sms,
    App,
}

impl SourceChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Audio => "audio",
            Self::Sms => "sms",
            Self::App => "app",
        }
    }
}

impl std::str::FromStr for SourceChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(Self::Photo),
            "audio" => Ok(Self::Audio),
            "sms" => Ok(Self::Sms),
            "app" => Ok(Self::App),
            other => Err(format!("unknown source channel '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            other => Err(format!("unknown media kind '{other}'")),
        }
    }
}

/// Reference to uploaded media (the upload service returns the URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
}

/// Report lifecycle.
///
/// ```text
/// Pending → Processing_Visual → Analyzed_Visual ─┐
/// Pending → Processing_Audio → Pending_Transcription ─┤
/// Pending (text only) ───────────────────────────┤
///                                    Processing_Oracle → Analyzed_Full → Clustered → Resolved
/// any Processing_* → Error (after the attempt budget)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "Pending")]
    Pending,
    #[serde(rename = "Processing_Audio")]
    ProcessingAudio,
    #[serde(rename = "Pending_Transcription")]
    PendingTranscription,
    #[serde(rename = "Processing_Visual")]
    ProcessingVisual,
    #[serde(rename = "Analyzed_Visual")]
    AnalyzedVisual,
    #[serde(rename = "Processing_Oracle")]
    ProcessingOracle,
    #[serde(rename = "Analyzed_Full")]
    AnalyzedFull,
    #[serde(rename = "Clustered")]
    Clustered,
    #[serde(rename = "Resolved")]
    Resolved,
    #[serde(rename = "Error")]
    Error,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::ProcessingAudio => "Processing_Audio",
            Self::PendingTranscription => "Pending_Transcription",
            Self::ProcessingVisual => "Processing_Visual",
            Self::AnalyzedVisual => "Analyzed_Visual",
            Self::ProcessingOracle => "Processing_Oracle",
            Self::AnalyzedFull => "Analyzed_Full",
            Self::Clustered => "Clustered",
            Self::Resolved => "Resolved",
            Self::Error => "Error",
        }
    }

    pub fn all() -> &'static [ReportStatus] {
        &[
            Self::Pending,
            Self::ProcessingAudio,
            Self::PendingTranscription,
            Self::ProcessingVisual,
            Self::AnalyzedVisual,
            Self::ProcessingOracle,
            Self::AnalyzedFull,
            Self::Clustered,
            Self::Resolved,
            Self::Error,
        ]
    }

    /// A private status held only while one worker owns the record.
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            Self::ProcessingAudio | Self::ProcessingVisual | Self::ProcessingOracle
        )
    }
}

/// Need lifecycle: `Unverified → Verified → InProgress → Completed`, with
/// `Flagged` as a side state for suspicious or duplicate requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeedStatus {
    Unverified,
    Verified,
    InProgress,
    Completed,
    Flagged,
}

impl NeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "Unverified",
            Self::Verified => "Verified",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Flagged => "Flagged",
        }
    }

    pub fn all() -> &'static [NeedStatus] {
        &[
            Self::Unverified,
            Self::Verified,
            Self::InProgress,
            Self::Completed,
            Self::Flagged,
        ]
    }
}

/// Primary status of an incident, tagged by kind.
///
/// The two status vocabularies are disjoint, so the untagged serde form is
/// the plain status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LifecycleStatus {
    Report(ReportStatus),
    Need(NeedStatus),
}

impl LifecycleStatus {
    pub fn kind(&self) -> IncidentKind {
        match self {
            Self::Report(_) => IncidentKind::Report,
            Self::Need(_) => IncidentKind::Need,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Report(s) => s.as_str(),
            Self::Need(s) => s.as_str(),
        }
    }

    /// Parse a stored status string for a record of the given kind.
    pub fn parse(kind: IncidentKind, s: &str) -> Option<Self> {
        match kind {
            IncidentKind::Report => ReportStatus::all()
                .iter()
                .find(|st| st.as_str() == s)
                .map(|st| Self::Report(*st)),
            IncidentKind::Need => NeedStatus::all()
                .iter()
                .find(|st| st.as_str() == s)
                .map(|st| Self::Need(*st)),
        }
    }

    /// Status from which an incident of `kind` becomes eligible for matching.
    pub fn dispatch_ready(kind: IncidentKind) -> Self {
        match kind {
            IncidentKind::Report => Self::Report(ReportStatus::AnalyzedFull),
            IncidentKind::Need => Self::Need(NeedStatus::Verified),
        }
    }

    /// Status an incident holds while stations are working on it.
    pub fn dispatched(kind: IncidentKind) -> Self {
        match kind {
            IncidentKind::Report => Self::Report(ReportStatus::Clustered),
            IncidentKind::Need => Self::Need(NeedStatus::InProgress),
        }
    }

    /// Terminal status once a station resolves the incident.
    pub fn closed(kind: IncidentKind) -> Self {
        match kind {
            IncidentKind::Report => Self::Report(ReportStatus::Resolved),
            IncidentKind::Need => Self::Need(NeedStatus::Completed),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Report(ReportStatus::Resolved | ReportStatus::Error)
                | Self::Need(NeedStatus::Completed)
        )
    }
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the vision stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionResult {
    pub tag: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Output of the severity ("oracle") stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityResult {
    /// Severity in `1..=10`.
    pub severity: u8,
    #[serde(default)]
    pub needs: BTreeSet<String>,
    #[serde(default)]
    pub summary: String,
}

/// Structured triage category of a need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeedType {
    Water,
    Food,
    Medical,
    Rescue,
    Shelter,
    Security,
    Fire,
    Other,
}

impl std::fmt::Display for NeedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Water => "Water",
            Self::Food => "Food",
            Self::Medical => "Medical",
            Self::Rescue => "Rescue",
            Self::Shelter => "Shelter",
            Self::Security => "Security",
            Self::Fire => "Fire",
            Self::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Triage urgency of a need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    /// Severity used on alerts for needs without a severity assessment.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Low => 3,
            Self::Medium => 5,
            Self::High => 8,
        }
    }
}

/// Triage block produced by the external SMS triage service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Triage {
    pub need_type: NeedType,
    pub urgency: Urgency,
    #[serde(default)]
    pub details: String,
}

/// Denormalized view of the station currently holding the incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedStation {
    pub id: StationId,
    pub name: String,
    #[serde(rename = "type")]
    pub station_type: StationType,
    pub assigned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchInfo>,
}

impl AssignedStation {
    pub fn new(station: &StationRef, at: DateTime<Utc>) -> Self {
        Self {
            id: station.id.clone(),
            name: station.name.clone(),
            station_type: station.station_type,
            assigned_at: at,
            dispatched_at: None,
            rejected_at: None,
            resolved_at: None,
            dispatch: None,
        }
    }
}

/// One citizen-originated distress signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: IncidentId,
    pub source: SourceChannel,
    pub text: String,
    pub media: Option<MediaRef>,
    pub location: Option<GeoPoint>,
    pub address: Option<String>,
    pub status: LifecycleStatus,
    pub vision_result: Option<VisionResult>,
    pub severity_result: Option<SeverityResult>,
    pub transcript: Option<String>,
    /// Present on needs only.
    pub triage: Option<Triage>,
    pub emergency_status: EmergencyStatus,
    pub assigned_station: Option<AssignedStation>,
    /// Manual override: dispatch straight to this station next time.
    pub rerouted_to_station: Option<StationRef>,
    /// Stations that rejected this incident on an earlier alert.
    pub rejected_station_ids: BTreeSet<StationId>,
    pub analysis_attempts: u32,
    pub dispatch_attempts: u32,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Classification inputs, identical for both kinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signals {
    pub vision_tag: Option<String>,
    /// Free text: report text plus transcript, or need message plus triage details.
    pub text: String,
    pub need_type: Option<NeedType>,
    pub needs: Vec<String>,
}

impl Incident {
    fn blank(source: SourceChannel, text: String, status: LifecycleStatus) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            text,
            media: None,
            location: None,
            address: None,
            status,
            vision_result: None,
            severity_result: None,
            transcript: None,
            triage: None,
            emergency_status: EmergencyStatus::None,
            assigned_station: None,
            rerouted_to_station: None,
            rejected_station_ids: BTreeSet::new(),
            analysis_attempts: 0,
            dispatch_attempts: 0,
            last_error: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh report in `Pending`.
    pub fn new_report(source: SourceChannel, text: impl Into<String>) -> Self {
        Self::blank(
            source,
            text.into(),
            LifecycleStatus::Report(ReportStatus::Pending),
        )
    }

    /// A fresh need in `Unverified`.
    pub fn new_need(message: impl Into<String>, triage: Triage) -> Self {
        let mut need = Self::blank(
            SourceChannel::Sms,
            message.into(),
            LifecycleStatus::Need(NeedStatus::Unverified),
        );
        need.triage = Some(triage);
        need
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn kind(&self) -> IncidentKind {
        self.status.kind()
    }

    /// Common projection consumed by the classification engine.
    pub fn signals(&self) -> Signals {
        let mut text = self.text.clone();
        if let Some(transcript) = &self.transcript {
            text.push(' ');
            text.push_str(transcript);
        }
        if let Some(triage) = &self.triage {
            text.push(' ');
            text.push_str(&triage.details);
        }

        Signals {
            vision_tag: self.vision_result.as_ref().map(|v| v.tag.clone()),
            text,
            need_type: self.triage.as_ref().map(|t| t.need_type),
            needs: self
                .severity_result
                .as_ref()
                .map(|s| s.needs.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Severity carried onto alerts: assessed severity, else triage urgency, else 5.
    pub fn effective_severity(&self) -> u8 {
        self.severity_result
            .as_ref()
            .map(|s| s.severity)
            .or_else(|| self.triage.as_ref().map(|t| t.urgency.severity()))
            .unwrap_or(5)
    }

    /// Whether both lifecycle axes have reached their end.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal() && self.emergency_status == EmergencyStatus::Resolved
    }
}
