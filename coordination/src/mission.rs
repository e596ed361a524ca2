//! Logistics missions: the route plan attached to a dispatched incident.
//!
//! Route optimisation is external. [`DirectRoutePlanner`] is the built-in
//! fallback: depot, stops in nearest-neighbour order, back to depot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::incident::IncidentId;
use crate::station::{StationId, StationType};

/// Unique identifier for missions
pub type MissionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Active,
    Completed,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl std::str::FromStr for MissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown mission status '{other}'")),
        }
    }
}

/// Snapshot of the depot station a mission departs from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionStation {
    pub id: StationId,
    pub name: String,
    #[serde(rename = "type")]
    pub station_type: StationType,
    pub location: GeoPoint,
}

/// One vehicle's loop through its stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRoute {
    pub vehicle_id: u32,
    /// `[lat, lng]` pairs, depot first and last.
    pub route: Vec<[f64; 2]>,
    pub total_distance_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: MissionId,
    pub incident_ids: Vec<IncidentId>,
    pub station: MissionStation,
    pub routes: Vec<VehicleRoute>,
    pub status: MissionStatus,
    pub created_at: DateTime<Utc>,
}

impl Mission {
    pub fn new(
        incident_ids: Vec<IncidentId>,
        station: MissionStation,
        routes: Vec<VehicleRoute>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            incident_ids,
            station,
            routes,
            status: MissionStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn total_distance_m(&self) -> f64 {
        self.routes.iter().map(|r| r.total_distance_m).sum()
    }
}

/// Vehicle-routing seam.
pub trait RoutePlanner: Send + Sync {
    /// Plan routes from `depot` covering every stop.
    fn plan(&self, depot: GeoPoint, stops: &[GeoPoint]) -> Vec<VehicleRoute>;
}

/// Single-vehicle nearest-neighbour tour.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectRoutePlanner;

impl RoutePlanner for DirectRoutePlanner {
    fn plan(&self, depot: GeoPoint, stops: &[GeoPoint]) -> Vec<VehicleRoute> {
        let mut remaining: Vec<GeoPoint> = stops.to_vec();
        let mut route = vec![[depot.lat, depot.lng]];
        let mut current = depot;
        let mut total = 0.0;

        while !remaining.is_empty() {
            let (idx, dist) = remaining
                .iter()
                .enumerate()
                .map(|(i, p)| (i, current.distance_m(p)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap_or((0, 0.0));
            let next = remaining.remove(idx);
            total += dist;
            route.push([next.lat, next.lng]);
            current = next;
        }

        total += current.distance_m(&depot);
        route.push([depot.lat, depot.lng]);

        vec![VehicleRoute {
            vehicle_id: 0,
            route,
            total_distance_m: total,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_plan_round_trip() {
        let depot = GeoPoint::new(18.4549, 73.8563);
        let stop = GeoPoint::new(18.52, 73.85);
        let routes = DirectRoutePlanner.plan(depot, &[stop]);

        assert_eq!(routes.len(), 1);
        let r = &routes[0];
        assert_eq!(r.route.len(), 3);
        assert_eq!(r.route.first(), r.route.last());
        let expected = depot.distance_m(&stop) * 2.0;
        assert!((r.total_distance_m - expected).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_neighbour_order() {
        let depot = GeoPoint::new(0.0, 0.0);
        let far = GeoPoint::new(0.0, 2.0);
        let near = GeoPoint::new(0.0, 1.0);
        let routes = DirectRoutePlanner.plan(depot, &[far, near]);
        assert_eq!(routes[0].route[1], [0.0, 1.0]);
        assert_eq!(routes[0].route[2], [0.0, 2.0]);
    }

    #[test]
    fn test_empty_stops() {
        let depot = GeoPoint::new(1.0, 1.0);
        let routes = DirectRoutePlanner.plan(depot, &[]);
        assert_eq!(routes[0].total_distance_m, 0.0);
        assert_eq!(routes[0].route.len(), 2);
    }
}
