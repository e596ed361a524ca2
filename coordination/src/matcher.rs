//! Nearest-station matching.
//!
//! For each primary service type of the emergency, keep the single nearest
//! active station; merge across types without duplicates. When nothing
//! matched, repeat over the fallback types not yet tried. Equidistant
//! stations are broken by lowest station id.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::classify::{EmergencyType, FALLBACK_SERVICE_TYPES};
use crate::geo::GeoPoint;
use crate::station::{Station, StationId, StationType};
use crate::store::{Store, StoreResult};

/// Read side of the directory the matcher needs.
pub trait StationSource {
    /// Active stations whose type or capability set covers `service`.
    fn active_stations_serving(&self, service: StationType) -> StoreResult<Vec<Station>>;
}

impl StationSource for Store {
    fn active_stations_serving(&self, service: StationType) -> StoreResult<Vec<Station>> {
        Store::active_stations_serving(self, service)
    }
}

/// A candidate station and its great-circle distance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationMatch {
    pub station: Station,
    pub distance_km: f64,
    /// Service type the station was matched for.
    pub matched_as: StationType,
}

impl StationMatch {
    pub fn direct(station: Station, at: GeoPoint) -> Self {
        let distance_km = station.location.distance_km(&at);
        let matched_as = station.station_type;
        Self {
            station,
            distance_km,
            matched_as,
        }
    }
}

/// Ordered, de-duplicated candidates for `emergency` at `at`.
///
/// Stations in `exclude` (for example those that already rejected this
/// incident) are skipped as if they were inactive.
pub fn match_stations(
    source: &impl StationSource,
    emergency: EmergencyType,
    at: GeoPoint,
    exclude: &BTreeSet<StationId>,
) -> StoreResult<Vec<StationMatch>> {
    let primary = emergency.primary_service_types();
    let mut matches = nearest_per_type(source, primary, at, exclude)?;

    if matches.is_empty() {
        let fallback: Vec<StationType> = FALLBACK_SERVICE_TYPES
            .iter()
            .copied()
            .filter(|t| !primary.contains(t))
            .collect();
        tracing::debug!(
            emergency = %emergency,
            fallback = ?fallback,
            "No primary station in range, trying fallback types"
        );
        matches = nearest_per_type(source, &fallback, at, exclude)?;
    }

    Ok(matches)
}

fn nearest_per_type(
    source: &impl StationSource,
    types: &[StationType],
    at: GeoPoint,
    exclude: &BTreeSet<StationId>,
) -> StoreResult<Vec<StationMatch>> {
    let mut out: Vec<StationMatch> = Vec::new();

    for &service in types {
        let nearest = source
            .active_stations_serving(service)?
            .into_iter()
            .filter(|s| s.is_active() && !exclude.contains(&s.id))
            .map(|s| {
                let d = s.location.distance_km(&at);
                (s, d)
            })
            .min_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)));

        if let Some((station, distance_km)) = nearest {
            if out.iter().all(|m| m.station.id != station.id) {
                out.push(StationMatch {
                    station,
                    distance_km,
                    matched_as: service,
                });
            }
        }
    }

    Ok(out)
}
