//! Table definitions for the SQLite store
//!
//! Sub-records that are only ever read and written whole (vision/severity
//! results, triage, station snapshots) are JSON text columns. Alert
//! deliveries get their own table so each station's row is updated in place.

/// Connection-wide settings applied once at open.
pub const PRAGMAS: &str = "
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
";

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS incidents (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    source TEXT NOT NULL,
    text TEXT NOT NULL,
    media_url TEXT,
    media_kind TEXT,
    lat REAL,
    lng REAL,
    address TEXT,
    status TEXT NOT NULL,
    claimed_from TEXT,
    claimed_at TEXT,
    vision_result TEXT,
    severity_result TEXT,
    transcript TEXT,
    triage TEXT,
    emergency_status TEXT NOT NULL,
    assigned_station TEXT,
    rerouted_to_station TEXT,
    rejected_station_ids TEXT NOT NULL,
    analysis_attempts INTEGER NOT NULL DEFAULT 0,
    dispatch_attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents(status, created_at);

CREATE TABLE IF NOT EXISTS stations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    capabilities TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    api_key TEXT NOT NULL,
    status TEXT NOT NULL,
    alerts_received INTEGER NOT NULL DEFAULT 0,
    alerts_acknowledged INTEGER NOT NULL DEFAULT 0,
    alerts_resolved INTEGER NOT NULL DEFAULT 0,
    avg_response_secs REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stations_type ON stations(type, status);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    source_kind TEXT NOT NULL,
    source_id TEXT NOT NULL,
    emergency_type TEXT NOT NULL,
    severity INTEGER NOT NULL,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    address TEXT,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    needs TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_alerts_source ON alerts(source_id, created_at);

CREATE TABLE IF NOT EXISTS alert_deliveries (
    alert_id TEXT NOT NULL REFERENCES alerts(id),
    position INTEGER NOT NULL,
    station_id TEXT NOT NULL REFERENCES stations(id),
    station_name TEXT NOT NULL,
    station_type TEXT NOT NULL,
    distance_km REAL NOT NULL,
    sent_at TEXT,
    delivery_status TEXT NOT NULL,
    acknowledged_at TEXT,
    responded_at TEXT,
    rejected_at TEXT,
    resolved_at TEXT,
    rejection_reason TEXT,
    failure_reason TEXT,
    dispatch TEXT,
    notes TEXT,
    PRIMARY KEY (alert_id, station_id)
);

CREATE TABLE IF NOT EXISTS missions (
    id TEXT PRIMARY KEY,
    station TEXT NOT NULL,
    routes TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mission_incidents (
    mission_id TEXT NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
    incident_id TEXT NOT NULL,
    PRIMARY KEY (mission_id, incident_id)
);
CREATE INDEX IF NOT EXISTS idx_mission_incidents_incident ON mission_incidents(incident_id);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    incident_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    description TEXT NOT NULL,
    details TEXT,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_incident ON events(incident_id);
";

/// Column list shared by every incident `SELECT` and `RETURNING` clause.
pub const INCIDENT_COLUMNS: &str = "id, kind, source, text, media_url, media_kind, lat, lng, \
     address, status, vision_result, severity_result, transcript, triage, emergency_status, \
     assigned_station, rerouted_to_station, rejected_station_ids, analysis_attempts, \
     dispatch_attempts, last_error, claimed_at, created_at, updated_at, claimed_from";

pub const STATION_COLUMNS: &str = "id, name, type, lat, lng, capabilities, endpoint, api_key, \
     status, alerts_received, alerts_acknowledged, alerts_resolved, avg_response_secs, \
     created_at, updated_at";

pub const ALERT_COLUMNS: &str = "id, source_kind, source_id, emergency_type, severity, lat, lng, \
     address, title, description, needs, status, created_at, resolved_at";

pub const DELIVERY_COLUMNS: &str = "station_id, station_name, station_type, distance_km, sent_at, \
     delivery_status, acknowledged_at, responded_at, rejected_at, resolved_at, \
     rejection_reason, failure_reason, dispatch, notes";
