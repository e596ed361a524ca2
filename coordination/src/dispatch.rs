//! Alert dispatch: build the alert, push it to every matched station, and
//! record the assignment. [`DispatchPipeline`] wraps one pass of the
//! dispatch loop around it (claim, classify, match, dispatch, plan).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::alert::{Alert, AlertLocation, AlertStatus, DeliveryStatus, SourceRef, StationDelivery};
use crate::classify::{classify_signals, ClassificationRule, EmergencyType};
use crate::incident::{AssignedStation, Incident, IncidentId};
use crate::matcher::{match_stations, StationMatch};
use crate::mission::{Mission, MissionStation, RoutePlanner};
use crate::notify::{AlertPayload, DeliveryError, Origin, StationNotifier};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("incident {0} has no location data")]
    NoLocationData(IncidentId),

    #[error("incident {0} is not eligible for dispatch: {1}")]
    NotEligible(IncidentId, String),

    /// The dispatch claim was overridden (manual reroute) or reaped while
    /// the pushes ran. Any alert created for it has been cancelled.
    #[error("dispatch claim on incident {incident_id} was lost")]
    ClaimLost {
        incident_id: IncidentId,
        alert_id: Option<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-station push result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub station_id: String,
    pub station_name: String,
    pub distance_km: f64,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DispatchOutcome {
    /// At least one station was targeted; the incident is `assigned`.
    Assigned { station_id: String },
    /// The alert exists for audit but targeted nobody.
    NoStationsAvailable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub alert_id: String,
    pub emergency_type: EmergencyType,
    pub outcome: DispatchOutcome,
    pub deliveries: Vec<DeliveryReport>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| d.status == DeliveryStatus::Sent)
            .count()
    }
}

/// Creates alerts and fans them out to stations.
pub struct AlertDispatcher<N> {
    store: Store,
    notifier: N,
    origin: Origin,
    delivery_timeout: Duration,
}

impl<N: StationNotifier> AlertDispatcher<N> {
    pub fn new(store: Store, notifier: N, origin: Origin, delivery_timeout: Duration) -> Self {
        Self {
            store,
            notifier,
            origin,
            delivery_timeout,
        }
    }

    /// Dispatch `incident` to `matches`, in order.
    ///
    /// Pushes are sequential and never retried; a failed push is recorded
    /// on its delivery and the next station is tried. The first match
    /// becomes the assigned station.
    pub async fn dispatch(
        &self,
        incident: &Incident,
        emergency_type: EmergencyType,
        matches: &[StationMatch],
    ) -> Result<DispatchReport, DispatchError> {
        let location = incident
            .location
            .filter(|p| p.is_valid())
            .ok_or_else(|| DispatchError::NoLocationData(incident.id.clone()))?;

        let alert = build_alert(incident, emergency_type, AlertLocation::new(location, incident.address.clone()), matches);
        {
            let alert = alert.clone();
            self.store.blocking(move |s| s.insert_alert(&alert)).await?;
        }

        if matches.is_empty() {
            tracing::warn!(
                incident_id = %incident.id,
                alert_id = %alert.id,
                emergency = %emergency_type,
                "No stations available, alert kept for audit"
            );
            return Ok(DispatchReport {
                alert_id: alert.id,
                emergency_type,
                outcome: DispatchOutcome::NoStationsAvailable,
                deliveries: Vec::new(),
            });
        }

        let payload = AlertPayload::new(&alert, &self.origin);
        let mut deliveries = Vec::with_capacity(matches.len());
        for m in matches {
            let sent_at = Utc::now();
            let result =
                match tokio::time::timeout(self.delivery_timeout, self.notifier.push(&m.station, &payload))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
                };

            let error = result.err().map(|e| e.to_string());
            match &error {
                None => tracing::info!(
                    alert_id = %alert.id,
                    station_id = %m.station.id,
                    distance_km = m.distance_km,
                    "Alert delivered"
                ),
                Some(e) => tracing::warn!(
                    alert_id = %alert.id,
                    station_id = %m.station.id,
                    error = %e,
                    "Alert delivery failed"
                ),
            }

            let (alert_id, station_id, failure) = (alert.id.clone(), m.station.id.clone(), error.clone());
            let delivery = self
                .store
                .blocking(move |s| s.record_push_result(&alert_id, &station_id, sent_at, failure))
                .await?;
            deliveries.push(DeliveryReport {
                station_id: m.station.id.clone(),
                station_name: m.station.name.clone(),
                distance_km: m.distance_km,
                status: delivery.delivery_status,
                error,
            });
        }

        let targeted: Vec<String> = matches.iter().map(|m| m.station.id.clone()).collect();
        {
            let targeted = targeted.clone();
            self.store.blocking(move |s| s.record_received(&targeted)).await?;
        }

        let first = &matches[0].station;
        let assigned = AssignedStation::new(&first.to_ref(), Utc::now());
        let claimed = incident.clone();
        match self.store.blocking(move |s| s.mark_assigned(&claimed, assigned)).await {
            Ok(_) => {}
            Err(StoreError::ClaimLost(reason)) => {
                // the pushes already went out; the cancelled alert refuses their callbacks
                let alert_id = alert.id.clone();
                self.store.blocking(move |s| s.cancel_alert(&alert_id)).await?;
                tracing::warn!(
                    incident_id = %incident.id,
                    alert_id = %alert.id,
                    %reason,
                    "Dispatch claim lost, alert cancelled"
                );
                return Err(DispatchError::ClaimLost {
                    incident_id: incident.id.clone(),
                    alert_id: Some(alert.id),
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            incident_id = %incident.id,
            alert_id = %alert.id,
            emergency = %emergency_type,
            targeted = targeted.len(),
            delivered = deliveries.iter().filter(|d| d.error.is_none()).count(),
            "Incident assigned"
        );

        Ok(DispatchReport {
            alert_id: alert.id,
            emergency_type,
            outcome: DispatchOutcome::Assigned {
                station_id: first.id.clone(),
            },
            deliveries,
        })
    }
}

/// Synthesize the alert record for an incident.
pub fn build_alert(
    incident: &Incident,
    emergency_type: EmergencyType,
    location: AlertLocation,
    matches: &[StationMatch],
) -> Alert {
    let vision_tag = incident.vision_result.as_ref().map(|v| v.tag.as_str());
    let text = incident.text.trim();

    let title = match vision_tag {
        Some(tag) => format!("{} ({tag})", emergency_type.display_name()),
        None if !text.is_empty() => {
            format!("{}: {}", emergency_type.display_name(), truncate(text, 60))
        }
        None => emergency_type.display_name().to_string(),
    };

    let description = incident
        .severity_result
        .as_ref()
        .map(|s| s.summary.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .or_else(|| (!text.is_empty()).then(|| text.to_string()))
        .unwrap_or_else(|| {
            format!(
                "{} reported at ({:.5}, {:.5})",
                emergency_type.display_name(),
                location.lat,
                location.lng
            )
        });

    let needs = match (&incident.severity_result, &incident.triage) {
        (Some(s), _) if !s.needs.is_empty() => s.needs.iter().cloned().collect(),
        (_, Some(t)) => vec![t.need_type.to_string()],
        _ => Vec::new(),
    };

    Alert {
        id: uuid::Uuid::new_v4().to_string(),
        source: SourceRef {
            kind: incident.kind(),
            id: incident.id.clone(),
        },
        emergency_type,
        severity: incident.effective_severity(),
        location,
        title,
        description,
        needs,
        deliveries: matches
            .iter()
            .map(|m| {
                StationDelivery::pending(
                    m.station.id.clone(),
                    m.station.name.clone(),
                    m.station.station_type,
                    m.distance_km,
                )
            })
            .collect(),
        status: AlertStatus::Created,
        created_at: Utc::now(),
        resolved_at: None,
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}…", cut.trim_end())
    }
}

/// What one pass of the dispatch loop did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub incident_id: IncidentId,
    pub emergency_type: EmergencyType,
    pub rule: ClassificationRule,
    pub rerouted: bool,
    pub result: PipelineResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum PipelineResult {
    Assigned {
        report: DispatchReport,
        mission_id: Option<String>,
    },
    NoStationsAvailable {
        alert_id: String,
    },
    NoLocationData,
    /// A manual reroute (or the lease reaper) took the claim mid-pass; the
    /// pass's alert, if any, was cancelled and the next pass starts over.
    Superseded {
        alert_id: Option<String>,
    },
}

/// Claim → classify → match → dispatch → plan, for one incident.
pub struct DispatchPipeline<N> {
    store: Store,
    dispatcher: AlertDispatcher<N>,
    planner: Arc<dyn RoutePlanner>,
    max_attempts: u32,
}

impl<N: StationNotifier> DispatchPipeline<N> {
    pub fn new(
        store: Store,
        dispatcher: AlertDispatcher<N>,
        planner: Arc<dyn RoutePlanner>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            dispatcher,
            planner,
            max_attempts,
        }
    }

    /// Process the oldest dispatch-ready incident, if any.
    pub async fn dispatch_next(&self) -> Result<Option<PipelineOutcome>, DispatchError> {
        let max_attempts = self.max_attempts;
        let Some(claim) = self
            .store
            .blocking(move |s| s.claim_for_dispatch(max_attempts))
            .await?
        else {
            return Ok(None);
        };
        let incident = claim.incident;
        tracing::debug!(incident_id = %incident.id, from = %claim.claimed_from, "Dispatch claim won");

        match self.route(&incident).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                // give the claim back so the next pass can retry
                let (claimed, reason) = (incident.clone(), e.to_string());
                match self
                    .store
                    .blocking(move |s| s.release_dispatch(&claimed, &reason, false, max_attempts))
                    .await
                {
                    Ok(_) | Err(StoreError::ClaimLost(_)) => {}
                    Err(release_err) => tracing::error!(
                        incident_id = %incident.id,
                        error = %release_err,
                        "Failed to release dispatch claim"
                    ),
                }
                Err(e)
            }
        }
    }

    async fn route(&self, incident: &Incident) -> Result<PipelineOutcome, DispatchError> {
        let classification = classify_signals(&incident.signals());
        let emergency_type = classification.emergency_type;
        let outcome = |rerouted: bool, result: PipelineResult| PipelineOutcome {
            incident_id: incident.id.clone(),
            emergency_type,
            rule: classification.rule,
            rerouted,
            result,
        };

        let Some(location) = incident.location.filter(|p| p.is_valid()) else {
            tracing::warn!(incident_id = %incident.id, "No location data, parking until rerouted");
            let result = if self.release(incident, "no location data", true).await? {
                PipelineResult::NoLocationData
            } else {
                PipelineResult::Superseded { alert_id: None }
            };
            return Ok(outcome(incident.rerouted_to_station.is_some(), result));
        };

        let (matches, rerouted) = self.candidates(incident, emergency_type, location).await?;
        tracing::info!(
            incident_id = %incident.id,
            emergency = %emergency_type,
            rule = ?classification.rule,
            candidates = matches.len(),
            rerouted,
            "Routing incident"
        );

        let report = match self.dispatcher.dispatch(incident, emergency_type, &matches).await {
            Ok(report) => report,
            Err(DispatchError::ClaimLost { alert_id, .. }) => {
                return Ok(outcome(rerouted, PipelineResult::Superseded { alert_id }));
            }
            Err(e) => return Err(e),
        };

        let result = match &report.outcome {
            DispatchOutcome::NoStationsAvailable => {
                let alert_id = report.alert_id.clone();
                if self.release(incident, "no stations available", false).await? {
                    PipelineResult::NoStationsAvailable { alert_id }
                } else {
                    PipelineResult::Superseded {
                        alert_id: Some(alert_id),
                    }
                }
            }
            DispatchOutcome::Assigned { .. } => {
                let mission_id = self.plan_mission(incident, &matches[0], location).await?;
                PipelineResult::Assigned { report, mission_id }
            }
        };

        Ok(outcome(rerouted, result))
    }

    /// Hand the claim back. `false` when it was already taken away.
    async fn release(&self, incident: &Incident, reason: &'static str, park: bool) -> Result<bool, DispatchError> {
        let claimed = incident.clone();
        let max_attempts = self.max_attempts;
        match self
            .store
            .blocking(move |s| s.release_dispatch(&claimed, reason, park, max_attempts))
            .await
        {
            Ok(_) => Ok(true),
            Err(StoreError::ClaimLost(why)) => {
                tracing::debug!(incident_id = %incident.id, %why, "Claim already taken, nothing to release");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A manual reroute hint bypasses matching; otherwise match, skipping
    /// every station that already rejected this incident.
    async fn candidates(
        &self,
        incident: &Incident,
        emergency_type: EmergencyType,
        location: crate::geo::GeoPoint,
    ) -> Result<(Vec<StationMatch>, bool), DispatchError> {
        let incident_id = incident.id.clone();
        let hint = incident.rerouted_to_station.clone();
        let rejected = incident.rejected_station_ids.clone();

        self.store
            .blocking(move |store| {
                if let Some(hint) = hint {
                    match store.get_station(&hint.id)? {
                        Some(station) => {
                            if !station.is_active() {
                                tracing::warn!(
                                    incident_id = %incident_id,
                                    station_id = %station.id,
                                    status = station.status.as_str(),
                                    "Rerouting to a station that is not active"
                                );
                            }
                            return Ok((vec![StationMatch::direct(station, location)], true));
                        }
                        None => tracing::warn!(
                            incident_id = %incident_id,
                            station_id = %hint.id,
                            "Reroute target no longer exists, matching normally"
                        ),
                    }
                }

                let matches = match_stations(store, emergency_type, location, &rejected)?;
                Ok((matches, false))
            })
            .await
    }

    async fn plan_mission(
        &self,
        incident: &Incident,
        depot: &StationMatch,
        stop: crate::geo::GeoPoint,
    ) -> Result<Option<String>, DispatchError> {
        let routes = self.planner.plan(depot.station.location, &[stop]);
        if routes.is_empty() {
            return Ok(None);
        }
        let mission = Mission::new(
            vec![incident.id.clone()],
            MissionStation {
                id: depot.station.id.clone(),
                name: depot.station.name.clone(),
                station_type: depot.station.station_type,
                location: depot.station.location,
            },
            routes,
        );

        let stored = {
            let mission = mission.clone();
            self.store
                .blocking(move |s| s.insert_mission_for_assignment(&mission))
                .await?
        };
        if !stored {
            tracing::debug!(incident_id = %incident.id, "Assignment changed before planning, mission dropped");
            return Ok(None);
        }
        tracing::info!(
            incident_id = %incident.id,
            mission_id = %mission.id,
            distance_m = mission.total_distance_m(),
            "Mission planned"
        );
        Ok(Some(mission.id))
    }
}
