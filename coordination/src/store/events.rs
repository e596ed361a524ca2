//! Append-only audit log of everything that happens to an incident.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{parse_enum, parse_ts, ts, Store, StoreResult, StoreTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Claimed,
    AnalysisCompleted,
    AnalysisReverted,
    ClaimExpired,
    Requeued,
    NeedVerified,
    NeedFlagged,
    AlertCreated,
    Dispatched,
    DispatchDeferred,
    StationAcknowledged,
    StationDispatched,
    StationRejected,
    StationResolved,
    AllStationsRejected,
    Rerouted,
    MissionPlanned,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Claimed => "claimed",
            Self::AnalysisCompleted => "analysis_completed",
            Self::AnalysisReverted => "analysis_reverted",
            Self::ClaimExpired => "claim_expired",
            Self::Requeued => "requeued",
            Self::NeedVerified => "need_verified",
            Self::NeedFlagged => "need_flagged",
            Self::AlertCreated => "alert_created",
            Self::Dispatched => "dispatched",
            Self::DispatchDeferred => "dispatch_deferred",
            Self::StationAcknowledged => "station_acknowledged",
            Self::StationDispatched => "station_dispatched",
            Self::StationRejected => "station_rejected",
            Self::StationResolved => "station_resolved",
            Self::AllStationsRejected => "all_stations_rejected",
            Self::Rerouted => "rerouted",
            Self::MissionPlanned => "mission_planned",
        }
    }

    pub fn all() -> &'static [EventKind] {
        &[
            Self::Created,
            Self::Claimed,
            Self::AnalysisCompleted,
            Self::AnalysisReverted,
            Self::ClaimExpired,
            Self::Requeued,
            Self::NeedVerified,
            Self::NeedFlagged,
            Self::AlertCreated,
            Self::Dispatched,
            Self::DispatchDeferred,
            Self::StationAcknowledged,
            Self::StationDispatched,
            Self::StationRejected,
            Self::StationResolved,
            Self::AllStationsRejected,
            Self::Rerouted,
            Self::MissionPlanned,
        ]
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown event kind '{s}'"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: i64,
    pub incident_id: String,
    pub kind: EventKind,
    pub description: String,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl StoreTx<'_> {
    pub fn append_event(
        &self,
        incident_id: &str,
        kind: EventKind,
        description: &str,
        details: Option<serde_json::Value>,
    ) -> StoreResult<i64> {
        let details = details.map(|d| d.to_string());
        self.conn().execute(
            "INSERT INTO events (incident_id, event_type, description, details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![incident_id, kind.as_str(), description, details, ts(Utc::now())],
        )?;
        Ok(self.conn().last_insert_rowid())
    }
}

impl Store {
    /// Audit trail for one incident, oldest first.
    pub fn events_for_incident(&self, incident_id: &str) -> StoreResult<Vec<AuditEvent>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, incident_id, event_type, description, details, timestamp
                 FROM events
                 WHERE incident_id = ?1
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![incident_id], |row| {
                let details: Option<String> = row.get(4)?;
                Ok(AuditEvent {
                    id: row.get(0)?,
                    incident_id: row.get(1)?,
                    kind: parse_enum(&row.get::<_, String>(2)?)?,
                    description: row.get(3)?,
                    details: details.and_then(|d| serde_json::from_str(&d).ok()),
                    timestamp: parse_ts(&row.get::<_, String>(5)?)?,
                })
            })?;

            let mut events = Vec::new();
            for row in rows {
                events.push(row?);
            }
            Ok(events)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;
    use crate::store::StoreError;

    #[test]
    fn test_events_are_ordered_per_incident() {
        let (_dir, store) = temp_store();
        store
            .write(|tx| {
                tx.append_event("a", EventKind::Created, "first", None)?;
                tx.append_event("b", EventKind::Created, "other", None)?;
                tx.append_event(
                    "a",
                    EventKind::Dispatched,
                    "second",
                    Some(serde_json::json!({"stations": 2})),
                )?;
                Ok::<_, StoreError>(())
            })
            .unwrap();

        let events = store.events_for_incident("a").unwrap();
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Created, EventKind::Dispatched]);
        assert_eq!(events[1].details.as_ref().unwrap()["stations"], 2);
    }
}
