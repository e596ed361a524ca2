//! Incident rows: intake, the exclusive analysis/dispatch claims, and the
//! writes that move an incident along either lifecycle axis.

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::events::EventKind;
use super::schema::INCIDENT_COLUMNS;
use super::{
    conversion_error, from_json, from_opt_json, opt_json, parse_enum, parse_opt_ts, parse_ts, ts,
    Store, StoreError, StoreResult, StoreTx,
};
use crate::geo::GeoPoint;
use crate::incident::lifecycle::{check_emergency_transition, check_status_transition};
use crate::incident::{
    AnalysisStage, AssignedStation, EmergencyStatus, Incident, IncidentKind, LifecycleStatus,
    MediaRef, NeedStatus, ReportStatus, SeverityResult, VisionResult,
};

/// Result written by a successful analysis stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Vision(VisionResult),
    Transcript(String),
    Severity(SeverityResult),
}

impl StageOutput {
    pub fn stage(&self) -> AnalysisStage {
        match self {
            Self::Vision(_) => AnalysisStage::Vision,
            Self::Transcript(_) => AnalysisStage::Audio,
            Self::Severity(_) => AnalysisStage::Severity,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Self::Vision(_) => "vision_result",
            Self::Transcript(_) => "transcript",
            Self::Severity(_) => "severity_result",
        }
    }

    fn value(&self) -> StoreResult<String> {
        Ok(match self {
            Self::Vision(v) => serde_json::to_string(v)?,
            Self::Transcript(t) => t.clone(),
            Self::Severity(s) => serde_json::to_string(s)?,
        })
    }
}

/// A won analysis claim. The incident is held in its stage's
/// `Processing_*` status until completed or reverted.
#[derive(Debug, Clone)]
pub struct AnalysisClaim {
    pub stage: AnalysisStage,
    pub incident: Incident,
    pub claimed_from: ReportStatus,
}

/// A won dispatch claim. The incident is held in its dispatched status.
#[derive(Debug, Clone)]
pub struct DispatchClaim {
    pub incident: Incident,
    pub claimed_from: LifecycleStatus,
}

/// Row filter for reports a stage may claim.
fn stage_eligibility(stage: AnalysisStage) -> String {
    let report = IncidentKind::Report.as_str();
    let pending = ReportStatus::Pending.as_str();
    match stage {
        AnalysisStage::Vision => format!(
            "kind = '{report}' AND status = '{pending}' AND media_kind = 'image' \
             AND vision_result IS NULL"
        ),
        AnalysisStage::Audio => format!(
            "kind = '{report}' AND status = '{pending}' AND media_kind = 'audio' \
             AND transcript IS NULL"
        ),
        AnalysisStage::Severity => format!(
            "kind = '{report}' AND severity_result IS NULL \
             AND (status IN ('{visual}', '{transcription}') \
                  OR (status = '{pending}' AND media_url IS NULL))",
            visual = ReportStatus::AnalyzedVisual.as_str(),
            transcription = ReportStatus::PendingTranscription.as_str(),
        ),
    }
}

/// Row filter for incidents the dispatch loop may claim. `?2` is the
/// dispatch attempt budget.
fn dispatch_eligibility() -> String {
    format!(
        "((kind = '{report}' AND status = '{analyzed}') OR (kind = '{need}' AND status = '{verified}')) \
         AND emergency_status IN ('{none}', '{pending}', '{rejected}') \
         AND dispatch_attempts < ?2",
        report = IncidentKind::Report.as_str(),
        analyzed = ReportStatus::AnalyzedFull.as_str(),
        need = IncidentKind::Need.as_str(),
        verified = NeedStatus::Verified.as_str(),
        none = EmergencyStatus::None.as_str(),
        pending = EmergencyStatus::Pending.as_str(),
        rejected = EmergencyStatus::Rejected.as_str(),
    )
}

pub(crate) fn map_incident(row: &Row<'_>) -> rusqlite::Result<Incident> {
    let kind: IncidentKind = parse_enum(&row.get::<_, String>(1)?)?;
    let status_str: String = row.get(9)?;
    let status = LifecycleStatus::parse(kind, &status_str)
        .ok_or_else(|| conversion_error(format!("unknown {} status '{status_str}'", kind.as_str())))?;

    let media = match (row.get::<_, Option<String>>(4)?, row.get::<_, Option<String>>(5)?) {
        (Some(url), Some(kind)) => Some(MediaRef {
            url,
            kind: parse_enum(&kind)?,
        }),
        _ => None,
    };
    let location = match (row.get::<_, Option<f64>>(6)?, row.get::<_, Option<f64>>(7)?) {
        (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
        _ => None,
    };

    Ok(Incident {
        id: row.get(0)?,
        source: parse_enum(&row.get::<_, String>(2)?)?,
        text: row.get(3)?,
        media,
        location,
        address: row.get(8)?,
        status,
        vision_result: from_opt_json(row.get(10)?)?,
        severity_result: from_opt_json(row.get(11)?)?,
        transcript: row.get(12)?,
        triage: from_opt_json(row.get(13)?)?,
        emergency_status: parse_enum(&row.get::<_, String>(14)?)?,
        assigned_station: from_opt_json(row.get(15)?)?,
        rerouted_to_station: from_opt_json(row.get(16)?)?,
        rejected_station_ids: from_json::<BTreeSet<String>>(&row.get::<_, String>(17)?)?,
        analysis_attempts: row.get(18)?,
        dispatch_attempts: row.get(19)?,
        last_error: row.get(20)?,
        claimed_at: parse_opt_ts(row.get(21)?)?,
        created_at: parse_ts(&row.get::<_, String>(22)?)?,
        updated_at: parse_ts(&row.get::<_, String>(23)?)?,
    })
}

fn select_incident(conn: &Connection, id: &str) -> StoreResult<Option<Incident>> {
    let sql = format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], map_incident).optional()?)
}

impl StoreTx<'_> {
    pub fn incident(&self, id: &str) -> StoreResult<Option<Incident>> {
        select_incident(self.conn(), id)
    }

    pub fn require_incident(&self, id: &str) -> StoreResult<Incident> {
        self.incident(id)?
            .ok_or_else(|| StoreError::NotFound(format!("incident {id}")))
    }

    /// Write every mutable column of `incident`. Clearing `claimed_at`
    /// also drops the remembered pre-claim status.
    pub fn save_incident(&self, incident: &Incident) -> StoreResult<()> {
        let rejected: Vec<&String> = incident.rejected_station_ids.iter().collect();
        let claimed_at = incident.claimed_at.map(ts);
        let changed = self.conn().execute(
            "UPDATE incidents SET
                status = ?1,
                vision_result = ?2,
                severity_result = ?3,
                transcript = ?4,
                emergency_status = ?5,
                assigned_station = ?6,
                rerouted_to_station = ?7,
                rejected_station_ids = ?8,
                analysis_attempts = ?9,
                dispatch_attempts = ?10,
                last_error = ?11,
                claimed_at = ?12,
                claimed_from = CASE WHEN ?12 IS NULL THEN NULL ELSE claimed_from END,
                lat = ?13,
                lng = ?14,
                updated_at = ?15
             WHERE id = ?16",
            params![
                incident.status.as_str(),
                opt_json(incident.vision_result.as_ref())?,
                opt_json(incident.severity_result.as_ref())?,
                incident.transcript,
                incident.emergency_status.as_str(),
                opt_json(incident.assigned_station.as_ref())?,
                opt_json(incident.rerouted_to_station.as_ref())?,
                serde_json::to_string(&rejected)?,
                incident.analysis_attempts,
                incident.dispatch_attempts,
                incident.last_error,
                claimed_at,
                incident.location.map(|p| p.lat),
                incident.location.map(|p| p.lng),
                ts(Utc::now()),
                incident.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("incident {}", incident.id)));
        }
        Ok(())
    }
}

impl Store {
    // =========================================================================
    // Intake and reads
    // =========================================================================

    /// Persist a freshly created incident.
    pub fn insert_incident(&self, incident: &Incident) -> StoreResult<()> {
        self.write(|tx| {
            let rejected: Vec<&String> = incident.rejected_station_ids.iter().collect();
            tx.conn().execute(
                "INSERT INTO incidents (
                    id, kind, source, text, media_url, media_kind, lat, lng, address, status,
                    vision_result, severity_result, transcript, triage, emergency_status,
                    assigned_station, rerouted_to_station, rejected_station_ids,
                    analysis_attempts, dispatch_attempts, last_error, claimed_at,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
                params![
                    incident.id,
                    incident.kind().as_str(),
                    incident.source.as_str(),
                    incident.text,
                    incident.media.as_ref().map(|m| m.url.as_str()),
                    incident.media.as_ref().map(|m| m.kind.as_str()),
                    incident.location.map(|p| p.lat),
                    incident.location.map(|p| p.lng),
                    incident.address,
                    incident.status.as_str(),
                    opt_json(incident.vision_result.as_ref())?,
                    opt_json(incident.severity_result.as_ref())?,
                    incident.transcript,
                    opt_json(incident.triage.as_ref())?,
                    incident.emergency_status.as_str(),
                    opt_json(incident.assigned_station.as_ref())?,
                    opt_json(incident.rerouted_to_station.as_ref())?,
                    serde_json::to_string(&rejected)?,
                    incident.analysis_attempts,
                    incident.dispatch_attempts,
                    incident.last_error,
                    incident.claimed_at.map(ts),
                    ts(incident.created_at),
                    ts(incident.updated_at),
                ],
            )?;
            tx.append_event(
                &incident.id,
                EventKind::Created,
                &format!("{} received via {}", incident.kind().as_str(), incident.source.as_str()),
                None,
            )?;
            Ok(())
        })
    }

    pub fn get_incident(&self, id: &str) -> StoreResult<Option<Incident>> {
        self.read(|conn| select_incident(conn, id))
    }

    pub fn require_incident(&self, id: &str) -> StoreResult<Incident> {
        self.get_incident(id)?
            .ok_or_else(|| StoreError::NotFound(format!("incident {id}")))
    }

    /// Incidents currently in `status`, oldest first.
    pub fn incidents_with_status(&self, status: LifecycleStatus) -> StoreResult<Vec<Incident>> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {INCIDENT_COLUMNS} FROM incidents
                 WHERE kind = ?1 AND status = ?2
                 ORDER BY created_at, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![status.kind().as_str(), status.as_str()],
                map_incident,
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    // =========================================================================
    // Analysis claims
    // =========================================================================

    /// Atomically claim the oldest report eligible for `stage`.
    ///
    /// The find and the mark are one conditional `UPDATE … RETURNING` under
    /// the write lock; losing the race (or finding nothing) is `Ok(None)`.
    pub fn claim_for_analysis(&self, stage: AnalysisStage) -> StoreResult<Option<AnalysisClaim>> {
        let eligibility = stage_eligibility(stage);
        let sql = format!(
            "UPDATE incidents
             SET status = ?1, claimed_from = status, claimed_at = ?2, updated_at = ?2
             WHERE id = (
                 SELECT id FROM incidents WHERE {eligibility}
                 ORDER BY created_at, id LIMIT 1
             ) AND {eligibility}
             RETURNING {INCIDENT_COLUMNS}"
        );
        let processing = stage.processing_status();

        self.write(|tx| {
            let claimed = tx
                .conn()
                .query_row(&sql, params![processing.as_str(), ts(Utc::now())], |row| {
                    let incident = map_incident(row)?;
                    let from: String = row.get(24)?;
                    Ok((incident, from))
                })
                .optional()?;

            let Some((incident, from)) = claimed else {
                return Ok(None);
            };
            let claimed_from = match LifecycleStatus::parse(IncidentKind::Report, &from) {
                Some(LifecycleStatus::Report(s)) => s,
                _ => {
                    return Err(StoreError::InvalidState(format!(
                        "incident {} claimed from unknown status '{from}'",
                        incident.id
                    )))
                }
            };
            tx.append_event(
                &incident.id,
                EventKind::Claimed,
                &format!("{stage} claim from {}", claimed_from.as_str()),
                None,
            )?;
            Ok(Some(AnalysisClaim {
                stage,
                incident,
                claimed_from,
            }))
        })
    }

    /// Write a stage result and the next forward status in one update.
    ///
    /// Fails with `InvalidState` if the claim is no longer held or the
    /// result field is already set.
    pub fn complete_analysis(&self, id: &str, output: &StageOutput) -> StoreResult<Incident> {
        let stage = output.stage();
        let column = output.column();
        let sql = format!(
            "UPDATE incidents
             SET {column} = ?1, status = ?2, claimed_from = NULL, claimed_at = NULL,
                 analysis_attempts = 0, last_error = NULL, updated_at = ?3
             WHERE id = ?4 AND status = ?5 AND {column} IS NULL
             RETURNING {INCIDENT_COLUMNS}"
        );
        let value = output.value()?;

        self.write(|tx| {
            let updated = tx
                .conn()
                .query_row(
                    &sql,
                    params![
                        value,
                        stage.completed_status().as_str(),
                        ts(Utc::now()),
                        id,
                        stage.processing_status().as_str(),
                    ],
                    map_incident,
                )
                .optional()?;

            match updated {
                Some(incident) => {
                    tx.append_event(
                        id,
                        EventKind::AnalysisCompleted,
                        &format!("{stage} analysis complete"),
                        Some(serde_json::json!({ "status": incident.status.as_str() })),
                    )?;
                    Ok(incident)
                }
                None => Err(lost_claim(tx, id, stage)?),
            }
        })
    }

    /// Give a failed claim back. Restores the pre-claim status, or moves
    /// the report to `Error` once `max_attempts` failures have accumulated.
    pub fn revert_analysis(
        &self,
        id: &str,
        stage: AnalysisStage,
        reason: &str,
        max_attempts: u32,
    ) -> StoreResult<ReportStatus> {
        self.write(|tx| {
            match revert_claim(tx, id, stage, reason, max_attempts)? {
                Some(status) => Ok(status),
                None => Err(lost_claim(tx, id, stage)?),
            }
        })
    }

    /// Revert every claim held longer than `lease`. Returns the incidents
    /// released and the status each now holds.
    pub fn release_stale_claims(
        &self,
        lease: Duration,
        max_attempts: u32,
    ) -> StoreResult<Vec<(String, LifecycleStatus)>> {
        let cutoff = ts(Utc::now() - lease);
        self.write(|tx| {
            let mut released = Vec::new();

            let stale: Vec<(String, String)> = {
                let mut stmt = tx.conn().prepare(
                    "SELECT id, status FROM incidents
                     WHERE claimed_at IS NOT NULL AND claimed_at < ?1
                     ORDER BY claimed_at",
                )?;
                let rows = stmt.query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            for (id, status) in stale {
                let processing = ReportStatus::all()
                    .iter()
                    .find(|s| s.as_str() == status)
                    .and_then(|s| AnalysisStage::owning(*s));

                if let Some(stage) = processing {
                    if let Some(to) =
                        revert_claim(tx, &id, stage, "claim lease expired", max_attempts)?
                    {
                        released.push((id, LifecycleStatus::Report(to)));
                    }
                    continue;
                }

                let mut incident = tx.require_incident(&id)?;
                let kind = incident.kind();
                if incident.status == LifecycleStatus::dispatched(kind)
                    && incident.emergency_status.awaiting_dispatch()
                {
                    let ready = LifecycleStatus::dispatch_ready(kind);
                    check_status_transition(incident.status, ready)?;
                    incident.status = ready;
                    incident.claimed_at = None;
                    incident.last_error = Some("dispatch claim lease expired".into());
                    tx.save_incident(&incident)?;
                    tx.append_event(
                        &id,
                        EventKind::ClaimExpired,
                        "dispatch claim lease expired",
                        None,
                    )?;
                    released.push((id, ready));
                }
            }
            Ok(released)
        })
    }

    /// Explicit error-revert: clear analysis results and restart from
    /// `Pending`. Only valid from `Error`.
    pub fn requeue_failed(&self, id: &str) -> StoreResult<Incident> {
        self.write(|tx| {
            let mut incident = tx.require_incident(id)?;
            let pending = LifecycleStatus::Report(ReportStatus::Pending);
            check_status_transition(incident.status, pending)?;

            incident.status = pending;
            incident.vision_result = None;
            incident.severity_result = None;
            incident.transcript = None;
            incident.analysis_attempts = 0;
            incident.last_error = None;
            incident.claimed_at = None;
            tx.save_incident(&incident)?;
            tx.append_event(id, EventKind::Requeued, "requeued after analysis failure", None)?;
            Ok(incident)
        })
    }

    // =========================================================================
    // Need verification
    // =========================================================================

    /// Move a need along its verification axis.
    pub fn set_need_status(&self, id: &str, to: NeedStatus) -> StoreResult<Incident> {
        self.write(|tx| {
            let mut incident = tx.require_incident(id)?;
            if incident.kind() != IncidentKind::Need {
                return Err(StoreError::InvalidState(format!("incident {id} is not a need")));
            }
            let to = LifecycleStatus::Need(to);
            check_status_transition(incident.status, to)?;
            incident.status = to;
            tx.save_incident(&incident)?;

            let kind = match to {
                LifecycleStatus::Need(NeedStatus::Flagged) => EventKind::NeedFlagged,
                _ => EventKind::NeedVerified,
            };
            tx.append_event(id, kind, &format!("need marked {}", to.as_str()), None)?;
            Ok(incident)
        })
    }

    // =========================================================================
    // Dispatch claims
    // =========================================================================

    /// Atomically take the oldest dispatch-ready incident into its
    /// dispatched status.
    pub fn claim_for_dispatch(&self, max_attempts: u32) -> StoreResult<Option<DispatchClaim>> {
        let eligibility = dispatch_eligibility();
        let sql = format!(
            "UPDATE incidents
             SET status = CASE kind WHEN '{report}' THEN '{clustered}' ELSE '{in_progress}' END,
                 claimed_from = status, claimed_at = ?1, updated_at = ?1
             WHERE id = (
                 SELECT id FROM incidents WHERE {eligibility}
                 ORDER BY created_at, id LIMIT 1
             ) AND {eligibility}
             RETURNING {INCIDENT_COLUMNS}",
            report = IncidentKind::Report.as_str(),
            clustered = ReportStatus::Clustered.as_str(),
            in_progress = NeedStatus::InProgress.as_str(),
        );

        self.write(|tx| {
            let claimed = tx
                .conn()
                .query_row(&sql, params![ts(Utc::now()), max_attempts], |row| {
                    let incident = map_incident(row)?;
                    let from: String = row.get(24)?;
                    Ok((incident, from))
                })
                .optional()?;

            let Some((incident, from)) = claimed else {
                return Ok(None);
            };
            let claimed_from = LifecycleStatus::parse(incident.kind(), &from).ok_or_else(|| {
                StoreError::InvalidState(format!("unknown pre-dispatch status '{from}'"))
            })?;
            tx.append_event(&incident.id, EventKind::Claimed, "dispatch claim", None)?;
            Ok(Some(DispatchClaim {
                incident,
                claimed_from,
            }))
        })
    }

    /// Record a dispatch that reached at least one station.
    ///
    /// `claimed` is the incident as returned by [`Store::claim_for_dispatch`];
    /// its `claimed_at` identifies the claim. A claim that was reaped or
    /// overridden by a manual reroute in the meantime is
    /// [`StoreError::ClaimLost`] and nothing is written.
    pub fn mark_assigned(&self, claimed: &Incident, assigned: AssignedStation) -> StoreResult<Incident> {
        let id = claimed.id.as_str();
        self.write(|tx| {
            let mut incident = held_dispatch_claim(tx, claimed)?;

            check_emergency_transition(incident.emergency_status, EmergencyStatus::Assigned)?;
            let description = format!("assigned to {} ({})", assigned.name, assigned.station_type);
            incident.emergency_status = EmergencyStatus::Assigned;
            incident.assigned_station = Some(assigned);
            incident.rerouted_to_station = None;
            incident.dispatch_attempts = 0;
            incident.claimed_at = None;
            incident.last_error = None;
            tx.save_incident(&incident)?;
            tx.append_event(id, EventKind::Dispatched, &description, None)?;
            Ok(incident)
        })
    }

    /// Hand a dispatch claim back without an assignment. `park` exhausts
    /// the attempt budget so only a manual reroute revives the incident.
    pub fn release_dispatch(
        &self,
        claimed: &Incident,
        reason: &str,
        park: bool,
        max_attempts: u32,
    ) -> StoreResult<Incident> {
        let id = claimed.id.as_str();
        self.write(|tx| {
            let mut incident = held_dispatch_claim(tx, claimed)?;
            let kind = incident.kind();

            let ready = LifecycleStatus::dispatch_ready(kind);
            check_status_transition(incident.status, ready)?;
            check_emergency_transition(incident.emergency_status, EmergencyStatus::Pending)?;
            incident.status = ready;
            incident.emergency_status = EmergencyStatus::Pending;
            incident.dispatch_attempts = if park {
                max_attempts.max(incident.dispatch_attempts)
            } else {
                incident.dispatch_attempts + 1
            };
            incident.last_error = Some(reason.to_string());
            incident.claimed_at = None;
            tx.save_incident(&incident)?;
            tx.append_event(id, EventKind::DispatchDeferred, reason, None)?;
            Ok(incident)
        })
    }
}

/// Load `claimed` and check its dispatch claim is still the one held.
fn held_dispatch_claim(tx: &StoreTx<'_>, claimed: &Incident) -> StoreResult<Incident> {
    let incident = tx.require_incident(&claimed.id)?;
    let dispatched = LifecycleStatus::dispatched(incident.kind());
    if claimed.claimed_at.is_none()
        || incident.claimed_at != claimed.claimed_at
        || incident.status != dispatched
    {
        return Err(StoreError::ClaimLost(format!(
            "incident {} is {} and no longer held by this dispatch claim",
            incident.id, incident.status
        )));
    }
    Ok(incident)
}

/// Shared by `revert_analysis` and the lease reaper.
fn revert_claim(
    tx: &StoreTx<'_>,
    id: &str,
    stage: AnalysisStage,
    reason: &str,
    max_attempts: u32,
) -> StoreResult<Option<ReportStatus>> {
    let reverted: Option<String> = tx
        .conn()
        .query_row(
            "UPDATE incidents
             SET status = CASE WHEN analysis_attempts + 1 >= ?1 THEN ?2 ELSE claimed_from END,
                 analysis_attempts = analysis_attempts + 1,
                 last_error = ?3, claimed_from = NULL, claimed_at = NULL, updated_at = ?4
             WHERE id = ?5 AND status = ?6 AND claimed_from IS NOT NULL
             RETURNING status",
            params![
                max_attempts,
                ReportStatus::Error.as_str(),
                reason,
                ts(Utc::now()),
                id,
                stage.processing_status().as_str(),
            ],
            |row| row.get(0),
        )
        .optional()?;

    let Some(status) = reverted else {
        return Ok(None);
    };
    let status = match LifecycleStatus::parse(IncidentKind::Report, &status) {
        Some(LifecycleStatus::Report(s)) => s,
        _ => {
            return Err(StoreError::InvalidState(format!(
                "incident {id} reverted to unknown status '{status}'"
            )))
        }
    };
    tx.append_event(
        id,
        EventKind::AnalysisReverted,
        &format!("{stage} analysis failed: {reason}"),
        Some(serde_json::json!({ "status": status.as_str() })),
    )?;
    Ok(Some(status))
}

/// Explain why a conditional update on a claim matched nothing.
fn lost_claim(tx: &StoreTx<'_>, id: &str, stage: AnalysisStage) -> StoreResult<StoreError> {
    Ok(match tx.incident(id)? {
        None => StoreError::NotFound(format!("incident {id}")),
        Some(incident) => StoreError::InvalidState(format!(
            "{stage} claim on incident {id} no longer held (status {})",
            incident.status
        )),
    })
}
