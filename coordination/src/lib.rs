//! Aegis Coordination Library
//!
//! Orchestration core for emergency incident routing:
//! - Incident records (reports and needs) with a two-axis lifecycle
//! - SQLite-backed store whose conditional updates are the only claim lock
//! - Deterministic keyword classification into emergency types
//! - Nearest-station matching over the station directory
//! - Alert fan-out to stations and the callback protocol that follows it
//!
//! # Flow
//!
//! ```text
//! intake → Pending → (vision | audio) → severity → Analyzed_Full
//!        → classify → match → dispatch → station callbacks
//!        → resolved | all rejected → match again
//! ```
//!
//! The runtime (HTTP surface, polling loops, configuration) lives in the
//! `aegis-agents` crate.

#![allow(clippy::uninlined_format_args)]

pub mod alert;
pub mod analysis;
pub mod classify;
pub mod directory;
pub mod dispatch;
pub mod geo;
pub mod incident;
pub mod intake;
pub mod matcher;
pub mod mission;
pub mod notify;
pub mod response;
pub mod station;
pub mod store;
pub mod worker;

pub use alert::{Alert, AlertStatus, DeliveryStatus, DispatchInfo, StationDelivery};
pub use analysis::{AnalysisError, StageAnalyzer};
pub use classify::{classify, classify_signals, Classification, ClassificationRule, EmergencyType};
pub use directory::{DirectoryError, StationDirectory};
pub use dispatch::{
    AlertDispatcher, DispatchError, DispatchOutcome, DispatchPipeline, DispatchReport,
    PipelineOutcome, PipelineResult,
};
pub use geo::{haversine_km, GeoPoint};
pub use incident::{
    AnalysisStage, EmergencyStatus, Incident, IncidentKind, LifecycleStatus, NeedStatus,
    ReportStatus,
};
pub use intake::{Geocoder, Intake, IntakeError, NeedSubmission, ReportSubmission};
pub use matcher::{match_stations, StationMatch};
pub use mission::{DirectRoutePlanner, Mission, RoutePlanner};
pub use notify::{AlertPayload, DeliveryError, HttpNotifier, Origin, StationNotifier};
pub use response::{
    CallbackOutcome, ResponseError, RerouteOutcome, StationCallback, StationEvent,
    StationResponseHandler,
};
pub use station::{NewStation, OperationalStatus, Station, StationType};
pub use store::{Store, StoreError, StoreResult};
pub use worker::{ClaimWorker, StepOutcome};
