//! Outbound alert pushes to station endpoints.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{Alert, AlertLocation};
use crate::classify::EmergencyType;
use crate::station::Station;

/// Header carrying the station's shared secret.
pub const API_KEY_HEADER: &str = "X-API-Key";
/// Header carrying the alert priority.
pub const PRIORITY_HEADER: &str = "X-Alert-Priority";

/// Who the push claims to come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub name: String,
    #[serde(rename = "type")]
    pub origin_type: String,
}

impl Default for Origin {
    fn default() -> Self {
        Self {
            name: "Aegis Command Center".into(),
            origin_type: "command_center".into(),
        }
    }
}

/// Wire body of a station push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub alert_id: String,
    pub emergency_type: EmergencyType,
    pub severity: u8,
    pub location: AlertLocation,
    pub title: String,
    pub description: String,
    pub needs: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub from_station: Origin,
}

impl AlertPayload {
    pub fn new(alert: &Alert, origin: &Origin) -> Self {
        Self {
            alert_id: alert.id.clone(),
            emergency_type: alert.emergency_type,
            severity: alert.severity,
            location: alert.location.clone(),
            title: alert.title.clone(),
            description: alert.description.clone(),
            needs: alert.needs.clone(),
            timestamp: alert.created_at,
            from_station: origin.clone(),
        }
    }

    /// `critical` iff severity ≥ 7.
    pub fn priority(&self) -> &'static str {
        if self.severity >= 7 {
            "critical"
        } else {
            "normal"
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("station answered HTTP {status}: {body}")]
    Refused { status: u16, body: String },
}

/// Delivery seam. One call per station, no retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StationNotifier: Send + Sync {
    async fn push(&self, station: &Station, payload: &AlertPayload) -> Result<(), DeliveryError>;
}

/// Pushes alerts over HTTP with a hard per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl StationNotifier for HttpNotifier {
    async fn push(&self, station: &Station, payload: &AlertPayload) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&station.endpoint)
            .header(API_KEY_HEADER, &station.api_key)
            .header(PRIORITY_HEADER, payload.priority())
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.timeout)
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Refused { status, body });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertStatus;
    use crate::geo::GeoPoint;
    use crate::incident::IncidentKind;

    fn alert(severity: u8) -> Alert {
        Alert {
            id: "alert-1".into(),
            source: crate::alert::SourceRef {
                kind: IncidentKind::Report,
                id: "inc-1".into(),
            },
            emergency_type: EmergencyType::TrafficAccident,
            severity,
            location: AlertLocation::new(GeoPoint::new(18.52, 73.85), None),
            title: "Traffic Accident".into(),
            description: String::new(),
            needs: vec![],
            deliveries: vec![],
            status: AlertStatus::Created,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn test_priority_threshold() {
        let origin = Origin::default();
        assert_eq!(AlertPayload::new(&alert(7), &origin).priority(), "critical");
        assert_eq!(AlertPayload::new(&alert(6), &origin).priority(), "normal");
    }

    #[test]
    fn test_payload_wire_shape() {
        let payload = AlertPayload::new(&alert(9), &Origin::default());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["alertId"], "alert-1");
        assert_eq!(json["emergencyType"], "traffic_accident");
        assert_eq!(json["location"]["lat"], 18.52);
        assert!(json["location"]["address"].is_null());
        assert_eq!(json["fromStation"]["type"], "command_center");
        assert!(json["timestamp"].is_string());
    }
}
