//! Station directory: registration, lookup, status and callback credentials.

use crate::station::{AuthFailure, NewStation, OperationalStatus, Station, StationType};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("invalid station: {0}")]
    Invalid(String),

    #[error("station {0} not found")]
    NotFound(String),

    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid API key for station {0}")]
    InvalidApiKey(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Registered stations, backed by the incident store.
#[derive(Debug, Clone)]
pub struct StationDirectory {
    store: Store,
}

impl StationDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Validate and register a station. The secret is generated when absent.
    pub fn register_station(&self, new: NewStation) -> Result<Station, DirectoryError> {
        if new.name.trim().is_empty() {
            return Err(DirectoryError::Invalid("name is empty".into()));
        }
        if !new.location.is_valid() {
            return Err(DirectoryError::Invalid(format!(
                "location {} out of range",
                new.location
            )));
        }
        if !(new.endpoint.starts_with("http://") || new.endpoint.starts_with("https://")) {
            return Err(DirectoryError::Invalid(format!(
                "endpoint '{}' is not an http(s) URL",
                new.endpoint
            )));
        }

        let station = Station::register(new);
        self.store.insert_station(&station)?;
        tracing::info!(
            station_id = %station.id,
            station_type = %station.station_type,
            name = %station.name,
            "Registered station"
        );
        Ok(station)
    }

    pub fn get_station(&self, id: &str) -> Result<Station, DirectoryError> {
        self.store
            .get_station(id)?
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))
    }

    pub fn list_stations(
        &self,
        station_type: Option<StationType>,
    ) -> Result<Vec<Station>, DirectoryError> {
        Ok(self.store.list_stations(station_type)?)
    }

    pub fn set_operational_status(
        &self,
        id: &str,
        status: OperationalStatus,
    ) -> Result<Station, DirectoryError> {
        match self.store.set_station_status(id, status) {
            Ok(station) => {
                tracing::info!(station_id = %id, status = status.as_str(), "Station status changed");
                Ok(station)
            }
            Err(StoreError::NotFound(_)) => Err(DirectoryError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a callback credential to its station. Nothing is mutated.
    pub fn authenticate(
        &self,
        station_id: &str,
        api_key: Option<&str>,
    ) -> Result<Station, DirectoryError> {
        if api_key.map_or(true, str::is_empty) {
            return Err(DirectoryError::MissingApiKey);
        }
        let station = self.get_station(station_id)?;
        match station.authenticate(api_key) {
            Ok(()) => Ok(station),
            Err(AuthFailure::Missing) => Err(DirectoryError::MissingApiKey),
            Err(AuthFailure::Mismatch) => {
                tracing::warn!(station_id = %station_id, "Rejected callback with mismatched API key");
                Err(DirectoryError::InvalidApiKey(station_id.to_string()))
            }
        }
    }

    pub fn record_received(&self, station_ids: &[String]) -> Result<(), DirectoryError> {
        Ok(self.store.record_received(station_ids)?)
    }

    pub fn record_acknowledged(
        &self,
        station_id: &str,
        response_secs: f64,
    ) -> Result<(), DirectoryError> {
        Ok(self.store.record_acknowledged(station_id, response_secs)?)
    }

    pub fn record_resolved(&self, station_id: &str) -> Result<(), DirectoryError> {
        Ok(self.store.record_resolved(station_id)?)
    }
}
