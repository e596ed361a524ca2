//! Station rows and their advisory counters.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::schema::STATION_COLUMNS;
use super::{
    conversion_error, from_json, parse_enum, parse_ts, to_json, ts, Store, StoreError, StoreResult,
    StoreTx,
};
use crate::geo::GeoPoint;
use crate::station::{OperationalStatus, Station, StationCounters, StationType};

fn counter(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| conversion_error(format!("negative station counter {value}")))
}

fn map_station(row: &Row<'_>) -> rusqlite::Result<Station> {
    Ok(Station {
        id: row.get(0)?,
        name: row.get(1)?,
        station_type: parse_enum(&row.get::<_, String>(2)?)?,
        location: GeoPoint::new(row.get(3)?, row.get(4)?),
        capabilities: from_json::<BTreeSet<String>>(&row.get::<_, String>(5)?)?,
        endpoint: row.get(6)?,
        api_key: row.get(7)?,
        status: parse_enum(&row.get::<_, String>(8)?)?,
        counters: StationCounters {
            alerts_received: counter(row, 9)?,
            alerts_acknowledged: counter(row, 10)?,
            alerts_resolved: counter(row, 11)?,
            avg_response_secs: row.get(12)?,
        },
        created_at: parse_ts(&row.get::<_, String>(13)?)?,
        updated_at: parse_ts(&row.get::<_, String>(14)?)?,
    })
}

fn select_station(conn: &Connection, id: &str) -> StoreResult<Option<Station>> {
    let sql = format!("SELECT {STATION_COLUMNS} FROM stations WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], map_station).optional()?)
}

impl StoreTx<'_> {
    pub fn station(&self, id: &str) -> StoreResult<Option<Station>> {
        select_station(self.conn(), id)
    }

    pub fn require_station(&self, id: &str) -> StoreResult<Station> {
        self.station(id)?
            .ok_or_else(|| StoreError::NotFound(format!("station {id}")))
    }

    /// Fold one response time into the acknowledged counter and mean.
    pub fn record_acknowledged(&self, station_id: &str, response_secs: f64) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE stations
             SET avg_response_secs =
                     (avg_response_secs * alerts_acknowledged + ?1) / (alerts_acknowledged + 1),
                 alerts_acknowledged = alerts_acknowledged + 1,
                 updated_at = ?2
             WHERE id = ?3",
            params![response_secs.max(0.0), ts(Utc::now()), station_id],
        )?;
        Ok(())
    }

    pub fn record_resolved(&self, station_id: &str) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE stations SET alerts_resolved = alerts_resolved + 1, updated_at = ?1
             WHERE id = ?2",
            params![ts(Utc::now()), station_id],
        )?;
        Ok(())
    }
}

impl Store {
    pub fn insert_station(&self, station: &Station) -> StoreResult<()> {
        self.write(|tx| {
            tx.conn().execute(
                "INSERT INTO stations (
                    id, name, type, lat, lng, capabilities, endpoint, api_key, status,
                    alerts_received, alerts_acknowledged, alerts_resolved, avg_response_secs,
                    created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    station.id,
                    station.name,
                    station.station_type.as_str(),
                    station.location.lat,
                    station.location.lng,
                    to_json(&station.capabilities)?,
                    station.endpoint,
                    station.api_key,
                    station.status.as_str(),
                    station.counters.alerts_received as i64,
                    station.counters.alerts_acknowledged as i64,
                    station.counters.alerts_resolved as i64,
                    station.counters.avg_response_secs,
                    ts(station.created_at),
                    ts(station.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_station(&self, id: &str) -> StoreResult<Option<Station>> {
        self.read(|conn| select_station(conn, id))
    }

    /// All stations, optionally of one type, ordered by id.
    pub fn list_stations(&self, station_type: Option<StationType>) -> StoreResult<Vec<Station>> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {STATION_COLUMNS} FROM stations
                 WHERE ?1 IS NULL OR type = ?1
                 ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![station_type.map(|t| t.as_str())], map_station)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Active stations able to serve `service`, by type or capability.
    pub fn active_stations_serving(&self, service: StationType) -> StoreResult<Vec<Station>> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {STATION_COLUMNS} FROM stations WHERE status = ?1 ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![OperationalStatus::Active.as_str()], map_station)?;
            let mut out = Vec::new();
            for row in rows {
                let station = row?;
                if station.serves(service) {
                    out.push(station);
                }
            }
            Ok(out)
        })
    }

    pub fn set_station_status(
        &self,
        id: &str,
        status: OperationalStatus,
    ) -> StoreResult<Station> {
        self.write(|tx| {
            let changed = tx.conn().execute(
                "UPDATE stations SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), ts(Utc::now()), id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("station {id}")));
            }
            tx.require_station(id)
        })
    }

    /// Count one more received alert for each station.
    pub fn record_received(&self, station_ids: &[String]) -> StoreResult<()> {
        if station_ids.is_empty() {
            return Ok(());
        }
        self.write(|tx| {
            let now = ts(Utc::now());
            for id in station_ids {
                tx.conn().execute(
                    "UPDATE stations SET alerts_received = alerts_received + 1, updated_at = ?1
                     WHERE id = ?2",
                    params![now, id],
                )?;
            }
            Ok(())
        })
    }

    pub fn record_acknowledged(&self, station_id: &str, response_secs: f64) -> StoreResult<()> {
        self.write(|tx| tx.record_acknowledged(station_id, response_secs))
    }

    pub fn record_resolved(&self, station_id: &str) -> StoreResult<()> {
        self.write(|tx| tx.record_resolved(station_id))
    }
}
