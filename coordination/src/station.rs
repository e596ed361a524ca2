//! Emergency-service stations: the directory entries alerts are routed to.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Unique identifier for stations
pub type StationId = String;

/// Service type of a station (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationType {
    Fire,
    Hospital,
    Police,
    Rescue,
    Ambulance,
    CoastGuard,
}

impl StationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fire => "fire",
            Self::Hospital => "hospital",
            Self::Police => "police",
            Self::Rescue => "rescue",
            Self::Ambulance => "ambulance",
            Self::CoastGuard => "coast_guard",
        }
    }

    pub fn all() -> &'static [StationType] {
        &[
            Self::Fire,
            Self::Hospital,
            Self::Police,
            Self::Rescue,
            Self::Ambulance,
            Self::CoastGuard,
        ]
    }
}

impl std::fmt::Display for StationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown station type '{s}'"))
    }
}

/// Operational status of a station. Only `Active` stations receive alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalStatus {
    Active,
    Inactive,
    Busy,
    Offline,
}

impl OperationalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }
}

impl std::str::FromStr for OperationalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "busy" => Ok(Self::Busy),
            "offline" => Ok(Self::Offline),
            other => Err(format!("unknown operational status '{other}'")),
        }
    }
}

/// Advisory per-station counters. Updated without coordination, so
/// concurrent responses may race by a count or two.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationCounters {
    pub alerts_received: u64,
    pub alerts_acknowledged: u64,
    pub alerts_resolved: u64,
    /// Running mean of seconds between push and first acknowledgement.
    pub avg_response_secs: f64,
}

/// A registered emergency-service station.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: StationId,
    pub name: String,
    #[serde(rename = "type")]
    pub station_type: StationType,
    pub location: GeoPoint,
    /// Service types this station can cover in addition to its own type.
    pub capabilities: BTreeSet<String>,
    /// Delivery endpoint for alert pushes.
    pub endpoint: String,
    /// Shared secret, sent as `X-API-Key` and expected back on callbacks.
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub status: OperationalStatus,
    pub counters: StationCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration request for a new station.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStation {
    pub name: String,
    #[serde(rename = "type")]
    pub station_type: StationType,
    pub location: GeoPoint,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub status: Option<OperationalStatus>,
}

/// Why a callback credential was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    Mismatch,
}

impl Station {
    /// Build a station from a registration request, generating the id and,
    /// when absent, the shared secret.
    pub fn register(new: NewStation) -> Self {
        let now = Utc::now();
        let api_key = new
            .api_key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            station_type: new.station_type,
            location: new.location,
            capabilities: new.capabilities,
            endpoint: new.endpoint,
            api_key,
            status: new.status.unwrap_or(OperationalStatus::Active),
            counters: StationCounters::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the station can answer for `service` (own type or capability).
    pub fn serves(&self, service: StationType) -> bool {
        self.station_type == service || self.capabilities.contains(service.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.status == OperationalStatus::Active
    }

    /// Check a callback credential against the station secret.
    pub fn authenticate(&self, presented: Option<&str>) -> Result<(), AuthFailure> {
        let Some(key) = presented.filter(|k| !k.is_empty()) else {
            return Err(AuthFailure::Missing);
        };
        if constant_time_eq(key.as_bytes(), self.api_key.as_bytes()) {
            Ok(())
        } else {
            Err(AuthFailure::Mismatch)
        }
    }

    /// Compact reference stored on incidents.
    pub fn to_ref(&self) -> StationRef {
        StationRef {
            id: self.id.clone(),
            name: self.name.clone(),
            station_type: self.station_type,
        }
    }
}

/// Minimal denormalized station reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationRef {
    pub id: StationId,
    pub name: String,
    #[serde(rename = "type")]
    pub station_type: StationType,
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
