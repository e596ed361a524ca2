//! Intake of citizen reports and triaged needs, and the external
//! verification hooks for needs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::geo::GeoPoint;
use crate::incident::{Incident, MediaKind, MediaRef, NeedStatus, SourceChannel, Triage};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("invalid submission: {0}")]
    Invalid(String),

    #[error("incident {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Free-text address lookup. `None` when the address cannot be placed.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Option<GeoPoint>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSubmission {
    pub source: SourceChannel,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_kind: Option<MediaKind>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeedSubmission {
    pub raw_message: String,
    pub triage: Triage,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Clone)]
pub struct Intake {
    store: Store,
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl Intake {
    pub fn new(store: Store, geocoder: Option<Arc<dyn Geocoder>>) -> Self {
        Self { store, geocoder }
    }

    pub async fn submit_report(&self, submission: ReportSubmission) -> Result<Incident, IntakeError> {
        let media = match submission.media_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => {
                let kind = submission
                    .media_kind
                    .or(match submission.source {
                        SourceChannel::Photo => Some(MediaKind::Image),
                        SourceChannel::Audio => Some(MediaKind::Audio),
                        _ => None,
                    })
                    .ok_or_else(|| IntakeError::Invalid("mediaKind is required with mediaUrl".into()))?;
                Some(MediaRef { url, kind })
            }
            None => None,
        };
        if media.is_none() && submission.text.trim().is_empty() {
            return Err(IntakeError::Invalid("a report needs text or media".into()));
        }

        let mut report = Incident::new_report(submission.source, submission.text.trim());
        report.media = media;
        report.address = submission.address.filter(|a| !a.trim().is_empty());
        report.location = self.locate(submission.location, report.address.as_deref()).await?;

        let record = report.clone();
        self.store.blocking(move |s| s.insert_incident(&record)).await?;
        tracing::info!(
            incident_id = %report.id,
            source = report.source.as_str(),
            has_media = report.media.is_some(),
            located = report.location.is_some(),
            "Report received"
        );
        Ok(report)
    }

    pub async fn submit_need(&self, submission: NeedSubmission) -> Result<Incident, IntakeError> {
        if submission.raw_message.trim().is_empty() {
            return Err(IntakeError::Invalid("rawMessage is empty".into()));
        }

        let mut need = Incident::new_need(submission.raw_message.trim(), submission.triage);
        need.address = submission.address.filter(|a| !a.trim().is_empty());
        need.location = self.locate(submission.location, need.address.as_deref()).await?;

        let record = need.clone();
        self.store.blocking(move |s| s.insert_incident(&record)).await?;
        tracing::info!(
            incident_id = %need.id,
            need_type = ?need.triage.as_ref().map(|t| t.need_type),
            located = need.location.is_some(),
            "Need received"
        );
        Ok(need)
    }

    /// Verified needs become eligible for dispatch.
    pub fn verify_need(&self, id: &str) -> Result<Incident, IntakeError> {
        self.set_need_status(id, NeedStatus::Verified)
    }

    pub fn flag_need(&self, id: &str) -> Result<Incident, IntakeError> {
        self.set_need_status(id, NeedStatus::Flagged)
    }

    fn set_need_status(&self, id: &str, to: NeedStatus) -> Result<Incident, IntakeError> {
        match self.store.set_need_status(id, to) {
            Ok(need) => {
                tracing::info!(incident_id = %id, status = to.as_str(), "Need status changed");
                Ok(need)
            }
            Err(StoreError::NotFound(_)) => Err(IntakeError::NotFound(id.to_string())),
            Err(StoreError::InvalidState(msg)) => Err(IntakeError::Invalid(msg)),
            Err(e) => Err(e.into()),
        }
    }

    async fn locate(
        &self,
        given: Option<GeoPoint>,
        address: Option<&str>,
    ) -> Result<Option<GeoPoint>, IntakeError> {
        if let Some(point) = given {
            if !point.is_valid() {
                return Err(IntakeError::Invalid(format!("location {point} out of range")));
            }
            return Ok(Some(point));
        }
        let (Some(geocoder), Some(address)) = (&self.geocoder, address) else {
            return Ok(None);
        };
        let found = geocoder.geocode(address).await.filter(GeoPoint::is_valid);
        if found.is_none() {
            tracing::warn!(%address, "Address could not be geocoded");
        }
        Ok(found)
    }
}
