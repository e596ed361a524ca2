//! Alerts: the append-only dispatch record and its per-station deliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::EmergencyType;
use crate::geo::GeoPoint;
use crate::incident::lifecycle::IllegalTransition;
use crate::incident::{IncidentId, IncidentKind};
use crate::station::{StationId, StationType};

/// Unique identifier for alerts
pub type AlertId = String;

/// Which incident an alert was raised for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub kind: IncidentKind,
    pub id: IncidentId,
}

/// Per-station delivery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Acknowledged,
    Rejected,
    Responding,
    Resolved,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Acknowledged => "acknowledged",
            Self::Rejected => "rejected",
            Self::Responding => "responding",
            Self::Resolved => "resolved",
        }
    }

    pub fn all() -> &'static [DeliveryStatus] {
        &[
            Self::Pending,
            Self::Sent,
            Self::Delivered,
            Self::Failed,
            Self::Acknowledged,
            Self::Rejected,
            Self::Responding,
            Self::Resolved,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Resolved)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown delivery status '{s}'"))
    }
}

/// Legal delivery edges.
///
/// ```text
/// pending → sent | delivered | failed
/// sent | delivered | failed → acknowledged | responding | rejected
/// acknowledged → responding | rejected | resolved
/// responding → resolved | rejected
/// ```
///
/// A failed push may still be answered out-of-band, so `failed` accepts
/// station callbacks.
pub fn is_legal_delivery_transition(from: DeliveryStatus, to: DeliveryStatus) -> bool {
    use DeliveryStatus::*;

    matches!(
        (from, to),
        (Pending, Sent)
            | (Pending, Delivered)
            | (Pending, Failed)
            | (Sent | Delivered | Failed, Acknowledged)
            | (Sent | Delivered | Failed, Responding)
            | (Sent | Delivered | Failed, Rejected)
            | (Acknowledged, Responding)
            | (Acknowledged, Rejected)
            | (Acknowledged, Resolved)
            | (Responding, Resolved)
            | (Responding, Rejected)
    )
}

pub fn check_delivery_transition(
    from: DeliveryStatus,
    to: DeliveryStatus,
) -> Result<(), IllegalTransition> {
    if is_legal_delivery_transition(from, to) {
        Ok(())
    } else {
        Err(IllegalTransition {
            axis: "delivery",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Aggregate alert status, derived from the deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Created,
    Dispatched,
    Acknowledged,
    Responding,
    Resolved,
    Cancelled,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Dispatched => "dispatched",
            Self::Acknowledged => "acknowledged",
            Self::Responding => "responding",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn all() -> &'static [AlertStatus] {
        &[
            Self::Created,
            Self::Dispatched,
            Self::Acknowledged,
            Self::Responding,
            Self::Resolved,
            Self::Cancelled,
        ]
    }

    /// Derive the aggregate from delivery states.
    ///
    /// Priority: any resolved, then all rejected, then the furthest
    /// progressed delivery. A failed push that its station never answered
    /// keeps the alert open: that station may still call back, and only a
    /// rejection from it completes the all-rejected set.
    pub fn derive(deliveries: &[StationDelivery]) -> Self {
        let any = |s: DeliveryStatus| deliveries.iter().any(|d| d.delivery_status == s);

        if any(DeliveryStatus::Resolved) {
            Self::Resolved
        } else if all_rejected(deliveries) {
            Self::Cancelled
        } else if any(DeliveryStatus::Responding) {
            Self::Responding
        } else if any(DeliveryStatus::Acknowledged) {
            Self::Acknowledged
        } else if any(DeliveryStatus::Sent) || any(DeliveryStatus::Delivered) {
            Self::Dispatched
        } else {
            Self::Created
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown alert status '{s}'"))
    }
}

/// Whether every delivery is rejected. Empty alerts never count, and an
/// unanswered `Failed` delivery counts as not rejected.
pub fn all_rejected(deliveries: &[StationDelivery]) -> bool {
    !deliveries.is_empty()
        && deliveries
            .iter()
            .all(|d| d.delivery_status == DeliveryStatus::Rejected)
}

/// Unit information reported by a station that dispatched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchInfo {
    #[serde(default)]
    pub dispatched_units: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_arrival: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One station's view of an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationDelivery {
    pub station_id: StationId,
    pub station_name: String,
    pub station_type: StationType,
    pub distance_km: f64,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivery_status: DeliveryStatus,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    /// Transport error for a failed push.
    pub failure_reason: Option<String>,
    pub dispatch: Option<DispatchInfo>,
    pub notes: Option<String>,
}

impl StationDelivery {
    pub fn pending(
        station_id: StationId,
        station_name: String,
        station_type: StationType,
        distance_km: f64,
    ) -> Self {
        Self {
            station_id,
            station_name,
            station_type,
            distance_km,
            sent_at: None,
            delivery_status: DeliveryStatus::Pending,
            acknowledged_at: None,
            responded_at: None,
            rejected_at: None,
            resolved_at: None,
            rejection_reason: None,
            failure_reason: None,
            dispatch: None,
            notes: None,
        }
    }
}

/// Location snapshot carried on the alert and in station pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLocation {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub address: Option<String>,
}

impl AlertLocation {
    pub fn new(point: GeoPoint, address: Option<String>) -> Self {
        Self {
            lat: point.lat,
            lng: point.lng,
            address,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// Immutable dispatch record. Only the delivery entries and the derived
/// aggregate change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub source: SourceRef,
    pub emergency_type: EmergencyType,
    /// Severity in `1..=10`.
    pub severity: u8,
    pub location: AlertLocation,
    pub title: String,
    pub description: String,
    pub needs: Vec<String>,
    pub deliveries: Vec<StationDelivery>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn delivery(&self, station_id: &str) -> Option<&StationDelivery> {
        self.deliveries.iter().find(|d| d.station_id == station_id)
    }

    pub fn all_rejected(&self) -> bool {
        all_rejected(&self.deliveries)
    }

    /// Stations whose push went through.
    pub fn delivered_count(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| d.delivery_status != DeliveryStatus::Failed)
            .filter(|d| d.delivery_status != DeliveryStatus::Pending)
            .count()
    }
}
