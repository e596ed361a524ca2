//! Mission rows and their incident links.

use rusqlite::{params, Connection, OptionalExtension};

use super::events::EventKind;
use super::{from_json, parse_enum, parse_ts, to_json, ts, Store, StoreResult, StoreTx};
use crate::incident::EmergencyStatus;
use crate::mission::Mission;

fn select_mission(conn: &Connection, id: &str) -> StoreResult<Option<Mission>> {
    let mission = conn
        .query_row(
            "SELECT id, station, routes, status, created_at FROM missions WHERE id = ?1",
            params![id],
            |row| {
                Ok(Mission {
                    id: row.get(0)?,
                    incident_ids: Vec::new(),
                    station: from_json(&row.get::<_, String>(1)?)?,
                    routes: from_json(&row.get::<_, String>(2)?)?,
                    status: parse_enum(&row.get::<_, String>(3)?)?,
                    created_at: parse_ts(&row.get::<_, String>(4)?)?,
                })
            },
        )
        .optional()?;

    let Some(mut mission) = mission else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT incident_id FROM mission_incidents WHERE mission_id = ?1 ORDER BY incident_id",
    )?;
    let ids = stmt.query_map(params![id], |row| row.get(0))?;
    mission.incident_ids = ids.collect::<rusqlite::Result<_>>()?;
    Ok(Some(mission))
}

fn mission_ids_for(conn: &Connection, incident_id: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT mission_id FROM mission_incidents WHERE incident_id = ?1 ORDER BY mission_id",
    )?;
    let ids = stmt.query_map(params![incident_id], |row| row.get(0))?;
    Ok(ids.collect::<rusqlite::Result<_>>()?)
}

impl StoreTx<'_> {
    /// Delete every mission that routes to `incident_id`. Returns how many
    /// were removed.
    pub fn delete_missions_for_incident(&self, incident_id: &str) -> StoreResult<usize> {
        let ids = mission_ids_for(self.conn(), incident_id)?;
        for id in &ids {
            self.conn()
                .execute("DELETE FROM missions WHERE id = ?1", params![id])?;
        }
        Ok(ids.len())
    }

    fn insert_mission(&self, mission: &Mission) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO missions (id, station, routes, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                mission.id,
                to_json(&mission.station)?,
                to_json(&mission.routes)?,
                mission.status.as_str(),
                ts(mission.created_at),
            ],
        )?;
        for incident_id in &mission.incident_ids {
            self.conn().execute(
                "INSERT INTO mission_incidents (mission_id, incident_id) VALUES (?1, ?2)",
                params![mission.id, incident_id],
            )?;
            self.append_event(
                incident_id,
                EventKind::MissionPlanned,
                &format!(
                    "mission {} from {} ({:.0} m)",
                    mission.id,
                    mission.station.name,
                    mission.total_distance_m()
                ),
                None,
            )?;
        }
        Ok(())
    }
}

impl Store {
    pub fn insert_mission(&self, mission: &Mission) -> StoreResult<()> {
        self.write(|tx| tx.insert_mission(mission))
    }

    /// Insert `mission` only while every incident it routes to is still
    /// assigned to the mission's station. A reroute that landed after the
    /// assignment leaves nothing to plan; returns whether it was stored.
    pub fn insert_mission_for_assignment(&self, mission: &Mission) -> StoreResult<bool> {
        self.write(|tx| {
            for incident_id in &mission.incident_ids {
                let incident = tx.require_incident(incident_id)?;
                let still_assigned = matches!(
                    incident.emergency_status,
                    EmergencyStatus::Assigned | EmergencyStatus::Dispatched
                ) && incident
                    .assigned_station
                    .as_ref()
                    .is_some_and(|a| a.id == mission.station.id);
                if !still_assigned {
                    return Ok(false);
                }
            }
            tx.insert_mission(mission)?;
            Ok(true)
        })
    }

    pub fn get_mission(&self, id: &str) -> StoreResult<Option<Mission>> {
        self.read(|conn| select_mission(conn, id))
    }

    pub fn missions_for_incident(&self, incident_id: &str) -> StoreResult<Vec<Mission>> {
        self.read(|conn| {
            let mut out = Vec::new();
            for id in mission_ids_for(conn, incident_id)? {
                if let Some(mission) = select_mission(conn, &id)? {
                    out.push(mission);
                }
            }
            Ok(out)
        })
    }

    pub fn delete_missions_for_incident(&self, incident_id: &str) -> StoreResult<usize> {
        self.write(|tx| tx.delete_missions_for_incident(incident_id))
    }
}
