//! Route handlers. Each one returns the `{success, message, data}` envelope.

use std::net::SocketAddr;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use coordination::alert::{Alert, DispatchInfo};
use coordination::intake::{NeedSubmission, ReportSubmission};
use coordination::mission::Mission;
use coordination::notify::API_KEY_HEADER;
use coordination::response::{StationCallback, StationEvent};
use coordination::station::{NewStation, OperationalStatus, Station, StationType};
use coordination::store::AuditEvent;
use coordination::Incident;
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    #[serde(skip)]
    status: StatusCode,
    success: bool,
    message: String,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            status: StatusCode::OK,
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn created(message: impl Into<String>, data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::ok(message, data)
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Rate-limit key: first forwarded hop, else the peer address.
fn client_key(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn throttle(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
) -> ApiResult<()> {
    let key = client_key(headers, peer);
    if state.limiter().check(&key) {
        Ok(())
    } else {
        tracing::warn!(client = %key, "Intake rate limit exceeded");
        Err(ApiError::RateLimited)
    }
}

/// Run synchronous store work on the blocking pool.
async fn blocking<T, E, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&AppState) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    ApiError: From<E>,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| ApiError::Internal(format!("task join error: {e}")))?
        .map_err(ApiError::from)
}

pub async fn health() -> ApiResponse<serde_json::Value> {
    ApiResponse::ok("ok", serde_json::json!({ "status": "ok" }))
}

// ============================================================================
// Intake
// ============================================================================

pub async fn submit_report(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<ReportSubmission>, JsonRejection>,
) -> ApiResult<ApiResponse<Incident>> {
    throttle(&state, &headers, peer.as_ref())?;
    let report = state.intake().submit_report(body(payload)?).await?;
    Ok(ApiResponse::created("Report received", report))
}

pub async fn submit_need(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<NeedSubmission>, JsonRejection>,
) -> ApiResult<ApiResponse<Incident>> {
    throttle(&state, &headers, peer.as_ref())?;
    let need = state.intake().submit_need(body(payload)?).await?;
    Ok(ApiResponse::created("Need received", need))
}

pub async fn verify_need(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<Incident>> {
    let need = blocking(&state, move |st| st.intake().verify_need(&id)).await?;
    Ok(ApiResponse::ok("Need verified", need))
}

pub async fn flag_need(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<Incident>> {
    let need = blocking(&state, move |st| st.intake().flag_need(&id)).await?;
    Ok(ApiResponse::ok("Need flagged", need))
}

// ============================================================================
// Incidents and alerts
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentView {
    pub incident: Incident,
    pub alerts: Vec<Alert>,
    pub missions: Vec<Mission>,
    pub events: Vec<AuditEvent>,
}

pub async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<IncidentView>> {
    let view = blocking(&state, move |st| {
        let store = st.store();
        let incident = store
            .get_incident(&id)?
            .ok_or_else(|| ApiError::NotFound(format!("incident {id} not found")))?;
        Ok::<_, ApiError>(IncidentView {
            alerts: store.alerts_for_incident(&id)?,
            missions: store.missions_for_incident(&id)?,
            events: store.events_for_incident(&id)?,
            incident,
        })
    })
    .await?;
    Ok(ApiResponse::ok("Incident found", view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerouteRequest {
    pub station_id: String,
}

pub async fn reroute_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RerouteRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = body(payload)?;
    let outcome =
        blocking(&state, move |st| st.responses().reroute(&id, &request.station_id)).await?;
    Ok(ApiResponse::ok("Incident rerouted", outcome))
}

pub async fn requeue_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<Incident>> {
    let incident = blocking(&state, move |st| st.store().requeue_failed(&id)).await?;
    Ok(ApiResponse::ok("Incident requeued for analysis", incident))
}

pub async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<Alert>> {
    let lookup_id = id.clone();
    let alert = blocking(&state, move |st| st.store().get_alert(&lookup_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("alert {id} not found")))?;
    Ok(ApiResponse::ok("Alert found", alert))
}

// ============================================================================
// Stations
// ============================================================================

/// A newly registered station, including its secret. The secret is only
/// ever returned here.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredStation {
    #[serde(flatten)]
    pub station: Station,
    pub api_key: String,
}

pub async fn register_station(
    State(state): State<AppState>,
    payload: Result<Json<NewStation>, JsonRejection>,
) -> ApiResult<ApiResponse<RegisteredStation>> {
    let new = body(payload)?;
    let station = blocking(&state, move |st| st.directory().register_station(new)).await?;
    let api_key = station.api_key.clone();
    Ok(ApiResponse::created(
        "Station registered",
        RegisteredStation { station, api_key },
    ))
}

#[derive(Debug, Deserialize)]
pub struct StationFilter {
    #[serde(rename = "type")]
    pub station_type: Option<StationType>,
}

pub async fn list_stations(
    State(state): State<AppState>,
    Query(filter): Query<StationFilter>,
) -> ApiResult<ApiResponse<Vec<Station>>> {
    let stations =
        blocking(&state, move |st| st.directory().list_stations(filter.station_type)).await?;
    Ok(ApiResponse::ok(format!("{} stations", stations.len()), stations))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: OperationalStatus,
}

pub async fn set_station_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<Station>> {
    let request = body(payload)?;
    let station = blocking(&state, move |st| {
        st.directory().set_operational_status(&id, request.status)
    })
    .await?;
    Ok(ApiResponse::ok("Station status updated", station))
}

/// Body shared by all four callbacks. Fields irrelevant to the event are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackBody {
    pub alert_id: String,
    pub station_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub dispatched_units: Vec<String>,
    #[serde(default)]
    pub estimated_arrival: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}

impl CallbackBody {
    fn into_callback(self, event: &str, header_key: Option<String>) -> ApiResult<StationCallback> {
        let event = match event {
            "acknowledged" => StationEvent::Acknowledged { notes: self.notes },
            "dispatched" => StationEvent::Dispatched(DispatchInfo {
                dispatched_units: self.dispatched_units,
                estimated_arrival: self.estimated_arrival,
                notes: self.notes,
            }),
            "rejected" => StationEvent::Rejected { reason: self.reason },
            "resolved" => StationEvent::Resolved {
                outcome: self.outcome,
                notes: self.notes,
            },
            other => return Err(ApiError::NotFound(format!("unknown callback '{other}'"))),
        };
        Ok(StationCallback {
            alert_id: self.alert_id,
            station_id: self.station_id,
            api_key: self.api_key.filter(|k| !k.is_empty()).or(header_key),
            event,
        })
    }
}

pub async fn station_callback(
    State(state): State<AppState>,
    Path(event): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<CallbackBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let header_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let callback = body(payload)?.into_callback(&event, header_key)?;
    let outcome = blocking(&state, move |st| st.responses().handle(callback)).await?;
    let message = if outcome.all_rejected {
        "All stations rejected, incident returned to matching".to_string()
    } else {
        format!("Alert {event}")
    };
    Ok(ApiResponse::ok(message, outcome))
}
