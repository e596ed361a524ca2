//! End-to-end dispatch against stations served by a local axum app.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use coordination::analysis::{AnalysisError, StageAnalyzer};
use coordination::incident::{
    AnalysisStage, MediaKind, MediaRef, NeedType, SeverityResult, SourceChannel, Triage, Urgency,
    VisionResult,
};
use coordination::matcher::StationMatch;
use coordination::notify::Origin;
use coordination::store::StageOutput;
use coordination::{
    AlertDispatcher, AlertStatus, ClaimWorker, DeliveryStatus, DirectRoutePlanner,
    DispatchOutcome, DispatchPipeline, EmergencyStatus, EmergencyType, GeoPoint, HttpNotifier,
    Incident, LifecycleStatus, NeedStatus, NewStation, PipelineResult, ReportStatus, Station,
    StationDirectory, StationType, StepOutcome, Store,
};
use serde_json::Value;

fn temp_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("aegis.db")).unwrap();
    (dir, store)
}

#[derive(Clone, Default)]
struct Received(Arc<Mutex<Vec<Value>>>);

/// `/ok` accepts every push, `/down` answers 503.
async fn spawn_stations() -> (SocketAddr, Received) {
    let received = Received::default();
    let app = Router::new()
        .route(
            "/ok",
            post(|State(r): State<Received>, Json(body): Json<Value>| async move {
                r.0.lock().unwrap().push(body);
                StatusCode::OK
            }),
        )
        .route("/down", post(|| async { StatusCode::SERVICE_UNAVAILABLE }))
        .with_state(received.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, received)
}

fn register(
    directory: &StationDirectory,
    name: &str,
    station_type: StationType,
    at: GeoPoint,
    endpoint: String,
) -> Station {
    directory
        .register_station(NewStation {
            name: name.into(),
            station_type,
            location: at,
            capabilities: Default::default(),
            endpoint,
            api_key: None,
            status: None,
        })
        .unwrap()
}

/// Answers one fixed result for its stage.
struct Fixed(StageOutput);

#[async_trait]
impl StageAnalyzer for Fixed {
    fn stage(&self) -> AnalysisStage {
        self.0.stage()
    }

    async fn analyze(&self, _incident: &Incident) -> Result<StageOutput, AnalysisError> {
        Ok(self.0.clone())
    }
}

fn worker(store: &Store, output: StageOutput) -> ClaimWorker {
    ClaimWorker::new(store.clone(), Arc::new(Fixed(output)), Duration::from_secs(5), 3)
}

fn pipeline(store: &Store) -> DispatchPipeline<HttpNotifier> {
    let notifier = HttpNotifier::new(Duration::from_secs(5)).unwrap();
    let dispatcher = AlertDispatcher::new(
        store.clone(),
        notifier,
        Origin::default(),
        Duration::from_secs(5),
    );
    DispatchPipeline::new(store.clone(), dispatcher, Arc::new(DirectRoutePlanner), 3)
}

#[tokio::test]
async fn test_fire_photo_is_dispatched_to_nearest_fire_station() {
    let (_dir, store) = temp_store();
    let (addr, received) = spawn_stations().await;
    let directory = StationDirectory::new(store.clone());

    let near = register(
        &directory,
        "Fire Station - Swargate",
        StationType::Fire,
        GeoPoint::new(18.4549, 73.8563),
        format!("http://{addr}/ok"),
    );
    register(
        &directory,
        "Fire Station - Far",
        StationType::Fire,
        GeoPoint::new(19.0760, 72.8777),
        format!("http://{addr}/ok"),
    );
    register(
        &directory,
        "Hospital 1 - Wakad",
        StationType::Hospital,
        GeoPoint::new(18.5135, 73.7604),
        format!("http://{addr}/ok"),
    );

    let report = Incident::new_report(SourceChannel::Photo, "")
        .with_media(MediaRef {
            url: "https://media.example/flames.jpg".into(),
            kind: MediaKind::Image,
        })
        .with_location(GeoPoint::new(18.52, 73.85));
    store.insert_incident(&report).unwrap();

    let vision = worker(
        &store,
        StageOutput::Vision(VisionResult {
            tag: "fire".into(),
            confidence: 0.9,
        }),
    );
    assert!(matches!(
        vision.run_once().await.unwrap(),
        StepOutcome::Completed { status: ReportStatus::AnalyzedVisual, .. }
    ));
    let severity = worker(
        &store,
        StageOutput::Severity(SeverityResult {
            severity: 8,
            needs: Default::default(),
            summary: String::new(),
        }),
    );
    assert!(matches!(
        severity.run_once().await.unwrap(),
        StepOutcome::Completed { status: ReportStatus::AnalyzedFull, .. }
    ));

    let outcome = pipeline(&store).dispatch_next().await.unwrap().unwrap();
    assert_eq!(outcome.emergency_type, EmergencyType::Fire);
    let PipelineResult::Assigned { report: dispatch, mission_id } = outcome.result else {
        panic!("expected assignment, got {:?}", outcome.result);
    };
    assert_eq!(dispatch.outcome, DispatchOutcome::Assigned { station_id: near.id.clone() });
    assert_eq!(dispatch.delivered(), 1);
    assert!(mission_id.is_some());

    let loaded = store.require_incident(&report.id).unwrap();
    assert_eq!(loaded.emergency_status, EmergencyStatus::Assigned);
    assert_eq!(loaded.status, LifecycleStatus::Report(ReportStatus::Clustered));
    let assigned = loaded.assigned_station.unwrap();
    assert_eq!(assigned.station_type, StationType::Fire);
    assert_eq!(assigned.id, near.id);

    let alert = store.get_alert(&dispatch.alert_id).unwrap().unwrap();
    assert_eq!(alert.status, AlertStatus::Dispatched);
    assert_eq!(alert.deliveries.len(), 1);

    let pushes = received.0.lock().unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0]["emergencyType"], "fire");
    assert_eq!(pushes[0]["fromStation"]["name"], "Aegis Command Center");
    assert_eq!(pushes[0]["location"]["lat"], 18.52);
}

#[tokio::test]
async fn test_partial_delivery_still_assigns() {
    let (_dir, store) = temp_store();
    let (addr, received) = spawn_stations().await;
    let directory = StationDirectory::new(store.clone());
    let at = GeoPoint::new(18.52, 73.85);

    let up = register(
        &directory,
        "Hospital 1 - Wakad",
        StationType::Hospital,
        GeoPoint::new(18.5135, 73.7604),
        format!("http://{addr}/ok"),
    );
    let down = register(
        &directory,
        "Rescue Station - Shivajinagar",
        StationType::Rescue,
        GeoPoint::new(18.5196, 73.8553),
        format!("http://{addr}/down"),
    );

    let need = Incident::new_need(
        "elderly man collapsed, not breathing",
        Triage {
            need_type: NeedType::Medical,
            urgency: Urgency::High,
            details: String::new(),
        },
    )
    .with_location(at);
    store.insert_incident(&need).unwrap();
    store.set_need_status(&need.id, NeedStatus::Verified).unwrap();
    let claim = store.claim_for_dispatch(3).unwrap().unwrap();

    let dispatcher = AlertDispatcher::new(
        store.clone(),
        HttpNotifier::new(Duration::from_secs(5)).unwrap(),
        Origin::default(),
        Duration::from_secs(5),
    );
    let matches = vec![StationMatch::direct(down.clone(), at), StationMatch::direct(up.clone(), at)];
    let report = dispatcher
        .dispatch(&claim.incident, EmergencyType::Medical, &matches)
        .await
        .unwrap();

    assert_eq!(report.delivered(), 1);
    let failed = report
        .deliveries
        .iter()
        .find(|d| d.station_id == down.id)
        .unwrap();
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert!(failed.error.as_deref().unwrap_or_default().contains("503"));
    let alert = store.get_alert(&report.alert_id).unwrap().unwrap();
    assert_eq!(alert.delivered_count(), 1);

    let loaded = store.require_incident(&need.id).unwrap();
    assert_eq!(loaded.emergency_status, EmergencyStatus::Assigned);
    assert_eq!(loaded.status, LifecycleStatus::Need(NeedStatus::InProgress));
    assert_eq!(received.0.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unlocated_need_is_parked_without_alert() {
    let (_dir, store) = temp_store();
    let need = Incident::new_need(
        "we are stuck on the roof",
        Triage {
            need_type: NeedType::Rescue,
            urgency: Urgency::High,
            details: String::new(),
        },
    );
    store.insert_incident(&need).unwrap();
    store.set_need_status(&need.id, NeedStatus::Verified).unwrap();

    let pipeline = pipeline(&store);
    let outcome = pipeline.dispatch_next().await.unwrap().unwrap();
    assert!(matches!(outcome.result, PipelineResult::NoLocationData));
    assert!(store.alerts_for_incident(&need.id).unwrap().is_empty());

    let loaded = store.require_incident(&need.id).unwrap();
    assert_eq!(loaded.status, LifecycleStatus::Need(NeedStatus::Verified));
    assert_eq!(loaded.emergency_status, EmergencyStatus::Pending);
    // parked: the next pass does not pick it up again
    assert!(pipeline.dispatch_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_no_stations_keeps_alert_for_audit() {
    let (_dir, store) = temp_store();
    let need = Incident::new_need(
        "house on fire",
        Triage {
            need_type: NeedType::Fire,
            urgency: Urgency::High,
            details: String::new(),
        },
    )
    .with_location(GeoPoint::new(18.52, 73.85));
    store.insert_incident(&need).unwrap();
    store.set_need_status(&need.id, NeedStatus::Verified).unwrap();

    let outcome = pipeline(&store).dispatch_next().await.unwrap().unwrap();
    let PipelineResult::NoStationsAvailable { alert_id } = outcome.result else {
        panic!("expected no stations, got {:?}", outcome.result);
    };
    let alert = store.get_alert(&alert_id).unwrap().unwrap();
    assert!(alert.deliveries.is_empty());

    let loaded = store.require_incident(&need.id).unwrap();
    assert_eq!(loaded.status, LifecycleStatus::Need(NeedStatus::Verified));
    assert_eq!(loaded.emergency_status, EmergencyStatus::Pending);
    assert_eq!(loaded.dispatch_attempts, 1);
}
