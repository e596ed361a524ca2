//! Station callbacks and manual reroute.
//!
//! A callback is authenticated first, without touching state. The delivery
//! update, the derived alert status, the incident's emergency axis, the
//! station counters and the audit events are then applied in one write
//! transaction, so concurrent callbacks on the same alert serialize on the
//! store's write lock and each one sees the other's delivery row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertStatus, DeliveryStatus, DispatchInfo, StationDelivery};
use crate::directory::{DirectoryError, StationDirectory};
use crate::incident::lifecycle::{check_emergency_transition, check_status_transition};
use crate::incident::{AssignedStation, EmergencyStatus, Incident, LifecycleStatus};
use crate::station::Station;
use crate::store::{EventKind, Store, StoreError, StoreTx};

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid API key for station {0}")]
    InvalidApiKey(String),

    #[error("alert {0} not found")]
    AlertNotFound(String),

    #[error("station {station_id} was not notified on alert {alert_id}")]
    StationNotOnAlert { alert_id: String, station_id: String },

    #[error("alert {alert_id} is {status} and accepts no more callbacks")]
    AlertClosed { alert_id: String, status: AlertStatus },

    #[error("station {0} not found")]
    StationNotFound(String),

    #[error(transparent)]
    IllegalTransition(#[from] crate::incident::IllegalTransition),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResponseError {
    /// Credential failures: nothing was mutated.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::MissingApiKey | Self::InvalidApiKey(_))
    }
}

/// What the station is reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum StationEvent {
    Acknowledged {
        notes: Option<String>,
    },
    Dispatched(DispatchInfo),
    Rejected {
        reason: Option<String>,
    },
    Resolved {
        outcome: Option<String>,
        notes: Option<String>,
    },
}

impl StationEvent {
    pub fn target(&self) -> DeliveryStatus {
        match self {
            Self::Acknowledged { .. } => DeliveryStatus::Acknowledged,
            Self::Dispatched(_) => DeliveryStatus::Responding,
            Self::Rejected { .. } => DeliveryStatus::Rejected,
            Self::Resolved { .. } => DeliveryStatus::Resolved,
        }
    }

    fn event_kind(&self) -> EventKind {
        match self {
            Self::Acknowledged { .. } => EventKind::StationAcknowledged,
            Self::Dispatched(_) => EventKind::StationDispatched,
            Self::Rejected { .. } => EventKind::StationRejected,
            Self::Resolved { .. } => EventKind::StationResolved,
        }
    }
}

/// One inbound callback.
#[derive(Debug, Clone)]
pub struct StationCallback {
    pub alert_id: String,
    pub station_id: String,
    pub api_key: Option<String>,
    pub event: StationEvent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackOutcome {
    pub alert_id: String,
    pub station_id: String,
    pub incident_id: String,
    pub delivery_status: DeliveryStatus,
    pub alert_status: AlertStatus,
    pub emergency_status: EmergencyStatus,
    pub status: LifecycleStatus,
    /// Every station on the alert has now rejected; matching restarts.
    pub all_rejected: bool,
    pub missions_deleted: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RerouteOutcome {
    pub incident: Incident,
    pub cancelled_alerts: Vec<String>,
    pub missions_deleted: usize,
}

/// Applies station callbacks and manager reroutes.
#[derive(Debug, Clone)]
pub struct StationResponseHandler {
    store: Store,
    directory: StationDirectory,
}

impl StationResponseHandler {
    pub fn new(store: Store) -> Self {
        let directory = StationDirectory::new(store.clone());
        Self { store, directory }
    }

    pub fn handle(&self, callback: StationCallback) -> Result<CallbackOutcome, ResponseError> {
        let station = self.authenticate(&callback.station_id, callback.api_key.as_deref())?;
        let now = Utc::now();

        let outcome = self.store.write(|tx| apply(tx, &station, &callback, now))?;

        tracing::info!(
            alert_id = %outcome.alert_id,
            station_id = %outcome.station_id,
            incident_id = %outcome.incident_id,
            delivery = %outcome.delivery_status,
            alert_status = %outcome.alert_status,
            emergency = %outcome.emergency_status,
            "Station callback applied"
        );
        if outcome.all_rejected {
            tracing::warn!(
                incident_id = %outcome.incident_id,
                alert_id = %outcome.alert_id,
                missions_deleted = outcome.missions_deleted,
                "Every notified station rejected, incident returned to matching"
            );
        }
        Ok(outcome)
    }

    fn authenticate(&self, station_id: &str, api_key: Option<&str>) -> Result<Station, ResponseError> {
        self.directory
            .authenticate(station_id, api_key)
            .map_err(|e| match e {
                DirectoryError::MissingApiKey => ResponseError::MissingApiKey,
                // unknown stations get the same answer as a wrong key
                DirectoryError::InvalidApiKey(id) | DirectoryError::NotFound(id) => {
                    ResponseError::InvalidApiKey(id)
                }
                DirectoryError::Invalid(msg) => ResponseError::Store(StoreError::InvalidState(msg)),
                DirectoryError::Store(e) => ResponseError::Store(e),
            })
    }

    /// Manager override: send the incident to `station_id` on the next
    /// dispatch pass, skipping classification and matching.
    ///
    /// Open alerts are cancelled and linked missions deleted. The incident
    /// goes back to its dispatch-ready status with `emergencyStatus`
    /// pending and a fresh attempt budget.
    pub fn reroute(&self, incident_id: &str, station_id: &str) -> Result<RerouteOutcome, ResponseError> {
        let outcome = self.store.write(|tx| {
            let station = tx
                .station(station_id)?
                .ok_or_else(|| ResponseError::StationNotFound(station_id.to_string()))?;
            let mut incident = tx.require_incident(incident_id)?;
            let kind = incident.kind();

            let ready = LifecycleStatus::dispatch_ready(kind);
            if incident.status != ready {
                check_status_transition(incident.status, ready)?;
                incident.status = ready;
            }
            check_emergency_transition(incident.emergency_status, EmergencyStatus::Pending)?;
            incident.emergency_status = EmergencyStatus::Pending;
            incident.assigned_station = None;
            incident.rerouted_to_station = Some(station.to_ref());
            incident.dispatch_attempts = 0;
            incident.claimed_at = None;
            incident.last_error = None;

            let cancelled_alerts = tx.open_alerts_for_incident(incident_id)?;
            for alert_id in &cancelled_alerts {
                tx.cancel_alert(alert_id)?;
            }
            let missions_deleted = tx.delete_missions_for_incident(incident_id)?;
            tx.save_incident(&incident)?;
            tx.append_event(
                incident_id,
                EventKind::Rerouted,
                &format!("manually rerouted to {} ({})", station.name, station.station_type),
                Some(serde_json::json!({
                    "stationId": station.id,
                    "cancelledAlerts": cancelled_alerts,
                    "missionsDeleted": missions_deleted,
                })),
            )?;

            Ok::<_, ResponseError>(RerouteOutcome {
                incident,
                cancelled_alerts,
                missions_deleted,
            })
        })?;

        tracing::info!(
            incident_id = %incident_id,
            station_id = %station_id,
            cancelled = outcome.cancelled_alerts.len(),
            missions_deleted = outcome.missions_deleted,
            "Incident rerouted"
        );
        Ok(outcome)
    }
}

fn apply(
    tx: &StoreTx<'_>,
    station: &Station,
    callback: &StationCallback,
    now: DateTime<Utc>,
) -> Result<CallbackOutcome, ResponseError> {
    let alert = tx
        .alert(&callback.alert_id)?
        .ok_or_else(|| ResponseError::AlertNotFound(callback.alert_id.clone()))?;
    if matches!(alert.status, AlertStatus::Cancelled | AlertStatus::Resolved) {
        return Err(ResponseError::AlertClosed {
            alert_id: alert.id,
            status: alert.status,
        });
    }
    let current = alert
        .delivery(&station.id)
        .cloned()
        .ok_or_else(|| ResponseError::StationNotOnAlert {
            alert_id: alert.id.clone(),
            station_id: station.id.clone(),
        })?;

    let expected = current.delivery_status;
    let delivery = next_delivery(current, &callback.event, now);
    if !tx.update_delivery(&alert.id, expected, &delivery)? {
        return Err(StoreError::InvalidState(format!(
            "delivery to {} on alert {} changed concurrently",
            station.id, alert.id
        ))
        .into());
    }
    let alert_status = tx.refresh_alert_status(&alert.id)?;

    // counters are advisory
    let response_secs = delivery
        .sent_at
        .map(|sent| (now - sent).num_milliseconds() as f64 / 1000.0)
        .unwrap_or(0.0);
    match &callback.event {
        StationEvent::Acknowledged { .. } => tx.record_acknowledged(&station.id, response_secs)?,
        StationEvent::Dispatched(_) if expected != DeliveryStatus::Acknowledged => {
            tx.record_acknowledged(&station.id, response_secs)?
        }
        StationEvent::Resolved { .. } => tx.record_resolved(&station.id)?,
        _ => {}
    }

    let mut incident = tx.require_incident(&alert.source.id)?;
    let all_rejected = alert_status == AlertStatus::Cancelled;
    let mut missions_deleted = 0;

    match &callback.event {
        StationEvent::Acknowledged { .. } => {}
        StationEvent::Dispatched(info) => {
            if incident.emergency_status != EmergencyStatus::Dispatched {
                check_emergency_transition(incident.emergency_status, EmergencyStatus::Dispatched)?;
                incident.emergency_status = EmergencyStatus::Dispatched;
            }
            let assigned = assigned_to(&mut incident, station, now);
            assigned.dispatched_at = Some(now);
            assigned.dispatch = Some(info.clone());
        }
        StationEvent::Rejected { .. } => {
            incident.rejected_station_ids.insert(station.id.clone());
            if let Some(assigned) = incident.assigned_station.as_mut() {
                if assigned.id == station.id {
                    assigned.rejected_at = Some(now);
                }
            }
            if all_rejected {
                check_emergency_transition(incident.emergency_status, EmergencyStatus::Rejected)?;
                incident.emergency_status = EmergencyStatus::Rejected;
                let kind = incident.kind();
                if incident.status == LifecycleStatus::dispatched(kind) {
                    let ready = LifecycleStatus::dispatch_ready(kind);
                    check_status_transition(incident.status, ready)?;
                    incident.status = ready;
                }
                incident.dispatch_attempts = 0;
                missions_deleted = tx.delete_missions_for_incident(&incident.id)?;
            }
        }
        StationEvent::Resolved { .. } => {
            check_emergency_transition(incident.emergency_status, EmergencyStatus::Resolved)?;
            incident.emergency_status = EmergencyStatus::Resolved;
            let closed = LifecycleStatus::closed(incident.kind());
            if incident.status != closed {
                check_status_transition(incident.status, closed)?;
                incident.status = closed;
            }
            assigned_to(&mut incident, station, now).resolved_at = Some(now);
            missions_deleted = tx.delete_missions_for_incident(&incident.id)?;
        }
    }
    tx.save_incident(&incident)?;

    tx.append_event(
        &incident.id,
        callback.event.event_kind(),
        &describe(station, &callback.event),
        Some(serde_json::json!({
            "alertId": alert.id,
            "stationId": station.id,
            "delivery": delivery.delivery_status.as_str(),
        })),
    )?;
    if all_rejected {
        tx.append_event(
            &incident.id,
            EventKind::AllStationsRejected,
            &format!("all {} notified station(s) rejected alert {}", alert.deliveries.len(), alert.id),
            Some(serde_json::json!({
                "missionsDeleted": missions_deleted,
                // one rejection is already "all" when only one station was asked
                "singleStation": alert.deliveries.len() == 1,
            })),
        )?;
    }

    Ok(CallbackOutcome {
        alert_id: alert.id,
        station_id: station.id.clone(),
        incident_id: incident.id.clone(),
        delivery_status: delivery.delivery_status,
        alert_status,
        emergency_status: incident.emergency_status,
        status: incident.status,
        all_rejected,
        missions_deleted,
    })
}

/// The delivery row after `event`. The edge itself is checked by the
/// conditional update.
fn next_delivery(mut d: StationDelivery, event: &StationEvent, now: DateTime<Utc>) -> StationDelivery {
    d.delivery_status = event.target();
    match event {
        StationEvent::Acknowledged { notes } => {
            d.acknowledged_at = Some(now);
            if notes.is_some() {
                d.notes = notes.clone();
            }
        }
        StationEvent::Dispatched(info) => {
            d.acknowledged_at.get_or_insert(now);
            d.responded_at = Some(now);
            d.dispatch = Some(info.clone());
        }
        StationEvent::Rejected { reason } => {
            d.rejected_at = Some(now);
            d.rejection_reason = reason.clone();
        }
        StationEvent::Resolved { outcome, notes } => {
            d.resolved_at = Some(now);
            let previous = d.notes.take();
            d.notes = match (outcome, notes) {
                (Some(o), Some(n)) => Some(format!("{o}: {n}")),
                (Some(o), None) => Some(o.clone()),
                (None, n) => n.clone().or(previous),
            };
        }
    }
    d
}

/// The station actually working the incident becomes the assigned one.
fn assigned_to<'a>(
    incident: &'a mut Incident,
    station: &Station,
    now: DateTime<Utc>,
) -> &'a mut AssignedStation {
    let keep = incident
        .assigned_station
        .as_ref()
        .is_some_and(|a| a.id == station.id);
    if !keep {
        incident.assigned_station = Some(AssignedStation::new(&station.to_ref(), now));
    }
    incident
        .assigned_station
        .get_or_insert_with(|| AssignedStation::new(&station.to_ref(), now))
}

fn describe(station: &Station, event: &StationEvent) -> String {
    match event {
        StationEvent::Acknowledged { .. } => format!("{} acknowledged", station.name),
        StationEvent::Dispatched(info) => match info.dispatched_units.len() {
            0 => format!("{} dispatched units", station.name),
            n => format!("{} dispatched {n} unit(s)", station.name),
        },
        StationEvent::Rejected { reason } => format!(
            "{} rejected: {}",
            station.name,
            reason.as_deref().unwrap_or("no reason given")
        ),
        StationEvent::Resolved { .. } => format!("{} resolved the incident", station.name),
    }
}
