//! Alert rows and their per-station delivery rows.
//!
//! Deliveries are updated one row at a time with the expected prior status
//! in the `WHERE` clause, so two stations answering the same alert never
//! overwrite each other's entry.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::events::EventKind;
use super::schema::{ALERT_COLUMNS, DELIVERY_COLUMNS};
use super::{
    from_json, from_opt_json, opt_json, parse_enum, parse_opt_ts, parse_ts, to_json, ts, Store,
    StoreError, StoreResult, StoreTx,
};
use crate::alert::{
    check_delivery_transition, Alert, AlertLocation, AlertStatus, DeliveryStatus, SourceRef,
    StationDelivery,
};

fn map_delivery(row: &Row<'_>) -> rusqlite::Result<StationDelivery> {
    Ok(StationDelivery {
        station_id: row.get(0)?,
        station_name: row.get(1)?,
        station_type: parse_enum(&row.get::<_, String>(2)?)?,
        distance_km: row.get(3)?,
        sent_at: parse_opt_ts(row.get(4)?)?,
        delivery_status: parse_enum(&row.get::<_, String>(5)?)?,
        acknowledged_at: parse_opt_ts(row.get(6)?)?,
        responded_at: parse_opt_ts(row.get(7)?)?,
        rejected_at: parse_opt_ts(row.get(8)?)?,
        resolved_at: parse_opt_ts(row.get(9)?)?,
        rejection_reason: row.get(10)?,
        failure_reason: row.get(11)?,
        dispatch: from_opt_json(row.get(12)?)?,
        notes: row.get(13)?,
    })
}

fn map_alert(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get(0)?,
        source: SourceRef {
            kind: parse_enum(&row.get::<_, String>(1)?)?,
            id: row.get(2)?,
        },
        emergency_type: parse_enum(&row.get::<_, String>(3)?)?,
        severity: row.get(4)?,
        location: AlertLocation {
            lat: row.get(5)?,
            lng: row.get(6)?,
            address: row.get(7)?,
        },
        title: row.get(8)?,
        description: row.get(9)?,
        needs: from_json(&row.get::<_, String>(10)?)?,
        deliveries: Vec::new(),
        status: parse_enum(&row.get::<_, String>(11)?)?,
        created_at: parse_ts(&row.get::<_, String>(12)?)?,
        resolved_at: parse_opt_ts(row.get(13)?)?,
    })
}

fn select_deliveries(conn: &Connection, alert_id: &str) -> StoreResult<Vec<StationDelivery>> {
    let sql = format!(
        "SELECT {DELIVERY_COLUMNS} FROM alert_deliveries WHERE alert_id = ?1 ORDER BY position"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![alert_id], map_delivery)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn select_alert(conn: &Connection, id: &str) -> StoreResult<Option<Alert>> {
    let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1");
    let alert = conn.query_row(&sql, params![id], map_alert).optional()?;
    match alert {
        Some(mut alert) => {
            alert.deliveries = select_deliveries(conn, id)?;
            Ok(Some(alert))
        }
        None => Ok(None),
    }
}

impl StoreTx<'_> {
    pub fn alert(&self, id: &str) -> StoreResult<Option<Alert>> {
        select_alert(self.conn(), id)
    }

    /// Open alerts (neither resolved nor cancelled) raised for an incident.
    pub fn open_alerts_for_incident(&self, incident_id: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM alerts
             WHERE source_id = ?1 AND status NOT IN (?2, ?3)
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(
            params![
                incident_id,
                AlertStatus::Resolved.as_str(),
                AlertStatus::Cancelled.as_str()
            ],
            |row| row.get(0),
        )?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Replace one delivery row, conditional on its stored status still
    /// being `expected`. Returns `false` when another writer got there first.
    pub fn update_delivery(
        &self,
        alert_id: &str,
        expected: DeliveryStatus,
        delivery: &StationDelivery,
    ) -> StoreResult<bool> {
        check_delivery_transition(expected, delivery.delivery_status)?;
        let changed = self.conn().execute(
            "UPDATE alert_deliveries SET
                sent_at = ?1,
                delivery_status = ?2,
                acknowledged_at = ?3,
                responded_at = ?4,
                rejected_at = ?5,
                resolved_at = ?6,
                rejection_reason = ?7,
                failure_reason = ?8,
                dispatch = ?9,
                notes = ?10
             WHERE alert_id = ?11 AND station_id = ?12 AND delivery_status = ?13",
            params![
                delivery.sent_at.map(ts),
                delivery.delivery_status.as_str(),
                delivery.acknowledged_at.map(ts),
                delivery.responded_at.map(ts),
                delivery.rejected_at.map(ts),
                delivery.resolved_at.map(ts),
                delivery.rejection_reason,
                delivery.failure_reason,
                opt_json(delivery.dispatch.as_ref())?,
                delivery.notes,
                alert_id,
                delivery.station_id,
                expected.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Recompute the aggregate from the stored deliveries and persist it.
    pub fn refresh_alert_status(&self, alert_id: &str) -> StoreResult<AlertStatus> {
        let current: Option<String> = self
            .conn()
            .query_row(
                "SELECT status FROM alerts WHERE id = ?1",
                params![alert_id],
                |row| row.get(0),
            )
            .optional()?;
        let current: AlertStatus = match current {
            Some(s) => s.parse().map_err(StoreError::Serialization)?,
            None => return Err(StoreError::NotFound(format!("alert {alert_id}"))),
        };
        // a manual cancel sticks
        if current == AlertStatus::Cancelled {
            return Ok(current);
        }

        let deliveries = select_deliveries(self.conn(), alert_id)?;
        let status = AlertStatus::derive(&deliveries);
        let resolved_at = (status == AlertStatus::Resolved).then(|| {
            deliveries
                .iter()
                .filter_map(|d| d.resolved_at)
                .min()
                .unwrap_or_else(Utc::now)
        });
        self.conn().execute(
            "UPDATE alerts SET status = ?1, resolved_at = COALESCE(resolved_at, ?2) WHERE id = ?3",
            params![status.as_str(), resolved_at.map(ts), alert_id],
        )?;
        Ok(status)
    }

    pub fn cancel_alert(&self, alert_id: &str) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE alerts SET status = ?1 WHERE id = ?2",
            params![AlertStatus::Cancelled.as_str(), alert_id],
        )?;
        Ok(())
    }
}

impl Store {
    /// Force an alert closed; later callbacks on it are refused.
    pub fn cancel_alert(&self, alert_id: &str) -> StoreResult<()> {
        self.write(|tx| tx.cancel_alert(alert_id))
    }

    /// Persist a new alert with all of its delivery rows.
    pub fn insert_alert(&self, alert: &Alert) -> StoreResult<()> {
        self.write(|tx| {
            tx.conn().execute(
                "INSERT INTO alerts (
                    id, source_kind, source_id, emergency_type, severity, lat, lng, address,
                    title, description, needs, status, created_at, resolved_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    alert.id,
                    alert.source.kind.as_str(),
                    alert.source.id,
                    alert.emergency_type.as_str(),
                    alert.severity,
                    alert.location.lat,
                    alert.location.lng,
                    alert.location.address,
                    alert.title,
                    alert.description,
                    to_json(&alert.needs)?,
                    alert.status.as_str(),
                    ts(alert.created_at),
                    alert.resolved_at.map(ts),
                ],
            )?;

            for (position, d) in alert.deliveries.iter().enumerate() {
                tx.conn().execute(
                    "INSERT INTO alert_deliveries (
                        alert_id, position, station_id, station_name, station_type, distance_km,
                        sent_at, delivery_status, acknowledged_at, responded_at, rejected_at,
                        resolved_at, rejection_reason, failure_reason, dispatch, notes
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    params![
                        alert.id,
                        position as i64,
                        d.station_id,
                        d.station_name,
                        d.station_type.as_str(),
                        d.distance_km,
                        d.sent_at.map(ts),
                        d.delivery_status.as_str(),
                        d.acknowledged_at.map(ts),
                        d.responded_at.map(ts),
                        d.rejected_at.map(ts),
                        d.resolved_at.map(ts),
                        d.rejection_reason,
                        d.failure_reason,
                        opt_json(d.dispatch.as_ref())?,
                        d.notes,
                    ],
                )?;
            }

            tx.append_event(
                &alert.source.id,
                EventKind::AlertCreated,
                &format!(
                    "{} alert {} for {} station(s)",
                    alert.emergency_type,
                    alert.id,
                    alert.deliveries.len()
                ),
                None,
            )?;
            Ok(())
        })
    }

    pub fn get_alert(&self, id: &str) -> StoreResult<Option<Alert>> {
        self.read(|conn| select_alert(conn, id))
    }

    /// Every alert raised for an incident, oldest first.
    pub fn alerts_for_incident(&self, incident_id: &str) -> StoreResult<Vec<Alert>> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {ALERT_COLUMNS} FROM alerts WHERE source_id = ?1 ORDER BY created_at, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![incident_id], map_alert)?;
            let mut alerts: Vec<Alert> = rows.collect::<rusqlite::Result<_>>()?;
            for alert in &mut alerts {
                alert.deliveries = select_deliveries(conn, &alert.id)?;
            }
            Ok(alerts)
        })
    }

    /// Record the outcome of one push. Only a `pending` delivery moves.
    pub fn record_push_result(
        &self,
        alert_id: &str,
        station_id: &str,
        sent_at: DateTime<Utc>,
        failure: Option<String>,
    ) -> StoreResult<StationDelivery> {
        self.write(|tx| {
            let alert = tx
                .alert(alert_id)?
                .ok_or_else(|| StoreError::NotFound(format!("alert {alert_id}")))?;
            let mut delivery = alert.delivery(station_id).cloned().ok_or_else(|| {
                StoreError::NotFound(format!("station {station_id} on alert {alert_id}"))
            })?;

            delivery.sent_at = Some(sent_at);
            delivery.delivery_status = if failure.is_some() {
                DeliveryStatus::Failed
            } else {
                DeliveryStatus::Sent
            };
            delivery.failure_reason = failure;

            if !tx.update_delivery(alert_id, DeliveryStatus::Pending, &delivery)? {
                return Err(StoreError::InvalidState(format!(
                    "delivery to {station_id} on alert {alert_id} already recorded"
                )));
            }
            tx.refresh_alert_status(alert_id)?;
            Ok(delivery)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::EmergencyType;
    use crate::geo::GeoPoint;
    use crate::incident::IncidentKind;
    use crate::station::{NewStation, Station, StationType};
    use crate::store::test_support::temp_store;

    fn seed_station(store: &Store, name: &str) -> Station {
        let station = Station::register(NewStation {
            name: name.into(),
            station_type: StationType::Fire,
            location: GeoPoint::new(18.45, 73.85),
            capabilities: Default::default(),
            endpoint: "http://127.0.0.1:1".into(),
            api_key: None,
            status: None,
        });
        store.insert_station(&station).unwrap();
        station
    }

    fn alert_for(stations: &[&Station]) -> Alert {
        Alert {
            id: uuid::Uuid::new_v4().to_string(),
            source: SourceRef {
                kind: IncidentKind::Report,
                id: "incident-1".into(),
            },
            emergency_type: EmergencyType::Fire,
            severity: 8,
            location: AlertLocation::new(GeoPoint::new(18.52, 73.85), Some("FC Road".into())),
            title: "Fire".into(),
            description: "smoke from a shop".into(),
            needs: vec!["fire suppression".into()],
            deliveries: stations
                .iter()
                .map(|s| StationDelivery::pending(s.id.clone(), s.name.clone(), s.station_type, 1.2))
                .collect(),
            status: AlertStatus::Created,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn test_alert_roundtrip_preserves_delivery_order() {
        let (_dir, store) = temp_store();
        let a = seed_station(&store, "A");
        let b = seed_station(&store, "B");
        let alert = alert_for(&[&b, &a]);
        store.insert_alert(&alert).unwrap();

        let loaded = store.get_alert(&alert.id).unwrap().unwrap();
        assert_eq!(loaded.deliveries, alert.deliveries);
        assert_eq!(loaded.location, alert.location);
        assert_eq!(loaded.needs, alert.needs);
        assert_eq!(loaded.deliveries[0].station_name, "B");
        assert_eq!(store.alerts_for_incident("incident-1").unwrap().len(), 1);
    }

    #[test]
    fn test_push_results_drive_aggregate() {
        let (_dir, store) = temp_store();
        let a = seed_station(&store, "A");
        let b = seed_station(&store, "B");
        let alert = alert_for(&[&a, &b]);
        store.insert_alert(&alert).unwrap();

        store
            .record_push_result(&alert.id, &a.id, Utc::now(), Some("connection refused".into()))
            .unwrap();
        assert_eq!(
            store.get_alert(&alert.id).unwrap().unwrap().status,
            AlertStatus::Created
        );

        store.record_push_result(&alert.id, &b.id, Utc::now(), None).unwrap();
        let loaded = store.get_alert(&alert.id).unwrap().unwrap();
        assert_eq!(loaded.status, AlertStatus::Dispatched);
        assert_eq!(loaded.delivery(&a.id).unwrap().delivery_status, DeliveryStatus::Failed);
        assert_eq!(
            loaded.delivery(&a.id).unwrap().failure_reason.as_deref(),
            Some("connection refused")
        );

        // a delivery is recorded once
        assert!(matches!(
            store.record_push_result(&alert.id, &b.id, Utc::now(), None),
            Err(StoreError::InvalidState(_))
        ));
    }

    #[test]
    fn test_stale_delivery_update_loses() {
        let (_dir, store) = temp_store();
        let a = seed_station(&store, "A");
        let alert = alert_for(&[&a]);
        store.insert_alert(&alert).unwrap();
        store.record_push_result(&alert.id, &a.id, Utc::now(), None).unwrap();

        let applied = store
            .write(|tx| {
                let mut d = tx.alert(&alert.id)?.unwrap().deliveries.remove(0);
                d.delivery_status = DeliveryStatus::Rejected;
                // expected status is out of date
                tx.update_delivery(&alert.id, DeliveryStatus::Acknowledged, &d)
            })
            .unwrap();
        assert!(!applied);
    }
}
