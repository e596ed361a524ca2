//! Station callbacks and reroutes over a real dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use axum::{http::StatusCode, routing::post, Router};
use coordination::incident::{NeedType, Triage, Urgency};
use coordination::matcher::StationMatch;
use coordination::mission::{Mission, MissionStation, RoutePlanner};
use coordination::notify::Origin;
use coordination::response::{StationCallback, StationEvent};
use coordination::store::events::EventKind;
use coordination::{
    AlertDispatcher, AlertPayload, AlertStatus, DeliveryError, DeliveryStatus, DirectRoutePlanner,
    DispatchError, DispatchOutcome, DispatchPipeline, EmergencyStatus, EmergencyType, GeoPoint,
    HttpNotifier, Incident, LifecycleStatus, NeedStatus, NewStation, PipelineResult,
    ResponseError, Station, StationDirectory, StationNotifier, StationResponseHandler,
    StationType, Store,
};

const SCENE: GeoPoint = GeoPoint {
    lat: 18.52,
    lng: 73.85,
};

struct Fixture {
    _dir: tempfile::TempDir,
    store: Store,
    directory: StationDirectory,
    responses: StationResponseHandler,
    endpoint: String,
}

impl Fixture {
    async fn new() -> Self {
        let app = Router::new().route("/alerts", post(|| async { StatusCode::OK }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("aegis.db")).unwrap();
        Self {
            directory: StationDirectory::new(store.clone()),
            responses: StationResponseHandler::new(store.clone()),
            store,
            _dir: dir,
            endpoint: format!("http://{addr}/alerts"),
        }
    }

    fn station(&self, name: &str, station_type: StationType, at: GeoPoint) -> Station {
        self.directory
            .register_station(NewStation {
                name: name.into(),
                station_type,
                location: at,
                capabilities: Default::default(),
                endpoint: self.endpoint.clone(),
                api_key: None,
                status: None,
            })
            .unwrap()
    }

    fn dispatcher(&self) -> AlertDispatcher<HttpNotifier> {
        AlertDispatcher::new(
            self.store.clone(),
            HttpNotifier::new(Duration::from_secs(5)).unwrap(),
            Origin::default(),
            Duration::from_secs(5),
        )
    }

    fn pipeline(&self) -> DispatchPipeline<HttpNotifier> {
        DispatchPipeline::new(
            self.store.clone(),
            self.dispatcher(),
            Arc::new(DirectRoutePlanner),
            3,
        )
    }

    /// A verified medical need at the scene, waiting for dispatch.
    fn verified_need(&self) -> Incident {
        let need = Incident::new_need(
            "pregnant woman in labour, road flooded",
            Triage {
                need_type: NeedType::Medical,
                urgency: Urgency::High,
                details: String::new(),
            },
        )
        .with_location(SCENE);
        self.store.insert_incident(&need).unwrap();
        self.store
            .set_need_status(&need.id, NeedStatus::Verified)
            .unwrap();
        need
    }

    /// A verified medical need at the scene, claimed for dispatch.
    fn claimed_need(&self) -> Incident {
        self.verified_need();
        self.store.claim_for_dispatch(3).unwrap().unwrap().incident
    }

    /// Dispatch `need` to both stations and attach a mission to it.
    async fn dispatch_to_both(&self, need: &Incident, a: &Station, b: &Station) -> String {
        let matches = vec![
            StationMatch::direct(a.clone(), SCENE),
            StationMatch::direct(b.clone(), SCENE),
        ];
        let report = self
            .dispatcher()
            .dispatch(need, EmergencyType::Medical, &matches)
            .await
            .unwrap();
        assert_eq!(report.delivered(), 2);

        let mission = Mission::new(
            vec![need.id.clone()],
            MissionStation {
                id: a.id.clone(),
                name: a.name.clone(),
                station_type: a.station_type,
                location: a.location,
            },
            DirectRoutePlanner.plan(a.location, &[SCENE]),
        );
        self.store.insert_mission(&mission).unwrap();
        report.alert_id
    }

    fn callback(&self, alert_id: &str, station: &Station, event: StationEvent) -> StationCallback {
        StationCallback {
            alert_id: alert_id.to_string(),
            station_id: station.id.clone(),
            api_key: Some(station.api_key.clone()),
            event,
        }
    }
}

fn rejected(reason: &str) -> StationEvent {
    StationEvent::Rejected {
        reason: Some(reason.into()),
    }
}

#[tokio::test]
async fn test_all_rejected_returns_incident_to_matching() {
    let fx = Fixture::new().await;
    let a = fx.station("Hospital 1 - Wakad", StationType::Hospital, GeoPoint::new(18.5135, 73.7604));
    let b = fx.station("Hospital 2 - Hadapsar", StationType::Hospital, GeoPoint::new(18.4852, 73.9047));
    let need = fx.claimed_need();
    let alert_id = fx.dispatch_to_both(&need, &a, &b).await;

    let first = fx
        .responses
        .handle(fx.callback(&alert_id, &a, rejected("no beds")))
        .unwrap();
    assert!(!first.all_rejected);
    assert_eq!(first.emergency_status, EmergencyStatus::Assigned);
    assert_eq!(fx.store.missions_for_incident(&need.id).unwrap().len(), 1);

    let second = fx
        .responses
        .handle(fx.callback(&alert_id, &b, rejected("no ambulance free")))
        .unwrap();
    assert!(second.all_rejected);
    assert_eq!(second.alert_status, AlertStatus::Cancelled);
    assert_eq!(second.missions_deleted, 1);

    let loaded = fx.store.require_incident(&need.id).unwrap();
    assert_eq!(loaded.emergency_status, EmergencyStatus::Rejected);
    assert_eq!(loaded.status, LifecycleStatus::Need(NeedStatus::Verified));
    assert_eq!(loaded.dispatch_attempts, 0);
    assert!(loaded.rejected_station_ids.contains(&a.id));
    assert!(loaded.rejected_station_ids.contains(&b.id));
    assert!(fx.store.missions_for_incident(&need.id).unwrap().is_empty());

    // the next pass matches again, skipping both stations that said no
    let c = fx.station("Hospital 3 - Hinjewadi", StationType::Hospital, GeoPoint::new(18.5870, 73.7785));
    let outcome = fx.pipeline().dispatch_next().await.unwrap().unwrap();
    let PipelineResult::Assigned { report, .. } = outcome.result else {
        panic!("expected reassignment, got {:?}", outcome.result);
    };
    assert_eq!(report.outcome, DispatchOutcome::Assigned { station_id: c.id.clone() });
    assert!(!outcome.rerouted);
}

#[tokio::test]
async fn test_auth_failures_change_nothing() {
    let fx = Fixture::new().await;
    let a = fx.station("Hospital 1 - Wakad", StationType::Hospital, GeoPoint::new(18.5135, 73.7604));
    let b = fx.station("Hospital 2 - Hadapsar", StationType::Hospital, GeoPoint::new(18.4852, 73.9047));
    let need = fx.claimed_need();
    let alert_id = fx.dispatch_to_both(&need, &a, &b).await;
    let before = fx.store.get_alert(&alert_id).unwrap().unwrap();

    let mut missing = fx.callback(&alert_id, &a, rejected("busy"));
    missing.api_key = None;
    assert!(matches!(
        fx.responses.handle(missing),
        Err(ResponseError::MissingApiKey)
    ));

    let mut wrong = fx.callback(&alert_id, &a, rejected("busy"));
    wrong.api_key = Some(b.api_key.clone());
    let err = fx.responses.handle(wrong).unwrap_err();
    assert!(err.is_auth_failure());

    assert_eq!(fx.store.get_alert(&alert_id).unwrap().unwrap(), before);
    assert_eq!(
        fx.store.require_incident(&need.id).unwrap().emergency_status,
        EmergencyStatus::Assigned
    );
}

#[tokio::test]
async fn test_acknowledge_dispatch_resolve() {
    let fx = Fixture::new().await;
    let a = fx.station("Hospital 1 - Wakad", StationType::Hospital, GeoPoint::new(18.5135, 73.7604));
    let b = fx.station("Hospital 2 - Hadapsar", StationType::Hospital, GeoPoint::new(18.4852, 73.9047));
    let need = fx.claimed_need();
    let alert_id = fx.dispatch_to_both(&need, &a, &b).await;

    let ack = fx
        .responses
        .handle(fx.callback(&alert_id, &b, StationEvent::Acknowledged { notes: None }))
        .unwrap();
    assert_eq!(ack.delivery_status, DeliveryStatus::Acknowledged);
    assert_eq!(ack.alert_status, AlertStatus::Acknowledged);

    let dispatched = fx
        .responses
        .handle(fx.callback(
            &alert_id,
            &b,
            StationEvent::Dispatched(coordination::DispatchInfo {
                dispatched_units: vec!["Ambulance 7".into()],
                estimated_arrival: Some("9 min".into()),
                notes: None,
            }),
        ))
        .unwrap();
    assert_eq!(dispatched.emergency_status, EmergencyStatus::Dispatched);
    let loaded = fx.store.require_incident(&need.id).unwrap();
    // the responding station takes over the assignment
    assert_eq!(loaded.assigned_station.as_ref().unwrap().id, b.id);

    let resolved = fx
        .responses
        .handle(fx.callback(
            &alert_id,
            &b,
            StationEvent::Resolved {
                outcome: Some("delivered at hospital".into()),
                notes: None,
            },
        ))
        .unwrap();
    assert_eq!(resolved.emergency_status, EmergencyStatus::Resolved);
    assert_eq!(resolved.status, LifecycleStatus::Need(NeedStatus::Completed));
    assert_eq!(resolved.missions_deleted, 1);

    let alert = fx.store.get_alert(&alert_id).unwrap().unwrap();
    assert_eq!(alert.status, AlertStatus::Resolved);
    assert!(alert.resolved_at.is_some());

    let station = fx.directory.get_station(&b.id).unwrap();
    assert_eq!(station.counters.alerts_acknowledged, 1);
    assert_eq!(station.counters.alerts_resolved, 1);

    assert!(matches!(
        fx.responses.handle(fx.callback(&alert_id, &a, rejected("late"))),
        Err(ResponseError::AlertClosed { .. })
    ));
}

#[tokio::test]
async fn test_manual_reroute_bypasses_matching() {
    let fx = Fixture::new().await;
    let a = fx.station("Hospital 1 - Wakad", StationType::Hospital, GeoPoint::new(18.5135, 73.7604));
    let b = fx.station("Hospital 2 - Hadapsar", StationType::Hospital, GeoPoint::new(18.4852, 73.9047));
    let police = fx.station(
        "Police Station 1 - Pimpri",
        StationType::Police,
        GeoPoint::new(18.6073, 73.7654),
    );
    let need = fx.claimed_need();
    let alert_id = fx.dispatch_to_both(&need, &a, &b).await;

    let outcome = fx.responses.reroute(&need.id, &police.id).unwrap();
    assert_eq!(outcome.cancelled_alerts, vec![alert_id.clone()]);
    assert_eq!(outcome.missions_deleted, 1);
    assert_eq!(outcome.incident.emergency_status, EmergencyStatus::Pending);
    assert_eq!(
        outcome.incident.rerouted_to_station.as_ref().unwrap().id,
        police.id
    );
    assert_eq!(
        fx.store.get_alert(&alert_id).unwrap().unwrap().status,
        AlertStatus::Cancelled
    );

    // a medical need goes to the police station because a manager said so
    let next = fx.pipeline().dispatch_next().await.unwrap().unwrap();
    assert!(next.rerouted);
    let PipelineResult::Assigned { report, .. } = next.result else {
        panic!("expected assignment, got {:?}", next.result);
    };
    assert_eq!(report.outcome, DispatchOutcome::Assigned { station_id: police.id.clone() });
    assert_eq!(report.deliveries.len(), 1);

    assert!(matches!(
        fx.responses.reroute(&need.id, "no-such-station"),
        Err(ResponseError::StationNotFound(_))
    ));
}

/// Delivers every push; the first one lets a manager reroute the incident
/// while the pass that sent it still holds the dispatch claim.
struct RerouteDuringPush {
    responses: StationResponseHandler,
    incident_id: String,
    target: String,
    fired: AtomicBool,
}

#[async_trait]
impl StationNotifier for RerouteDuringPush {
    async fn push(&self, _station: &Station, _payload: &AlertPayload) -> Result<(), DeliveryError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.responses.reroute(&self.incident_id, &self.target).unwrap();
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_reroute_during_dispatch_keeps_the_manager_choice() {
    let fx = Fixture::new().await;
    let hospital = fx.station("Hospital 1 - Wakad", StationType::Hospital, GeoPoint::new(18.5135, 73.7604));
    let police = fx.station(
        "Police Station 1 - Pimpri",
        StationType::Police,
        GeoPoint::new(18.6073, 73.7654),
    );
    let need = fx.claimed_need();

    fx.responses.reroute(&need.id, &police.id).unwrap();

    // the pass that claimed before the reroute finishes its pushes and loses
    let err = fx
        .dispatcher()
        .dispatch(&need, EmergencyType::Medical, &[StationMatch::direct(hospital.clone(), SCENE)])
        .await
        .unwrap_err();
    let DispatchError::ClaimLost { alert_id: Some(alert_id), .. } = &err else {
        panic!("expected a lost claim, got {err:?}");
    };
    assert_eq!(
        fx.store.get_alert(alert_id).unwrap().unwrap().status,
        AlertStatus::Cancelled
    );

    let loaded = fx.store.require_incident(&need.id).unwrap();
    assert!(loaded.assigned_station.is_none());
    assert_eq!(loaded.rerouted_to_station.as_ref().unwrap().id, police.id);
    assert_eq!(loaded.status, LifecycleStatus::Need(NeedStatus::Verified));
    assert_eq!(loaded.emergency_status, EmergencyStatus::Pending);

    let next = fx.pipeline().dispatch_next().await.unwrap().unwrap();
    assert!(next.rerouted);
    let PipelineResult::Assigned { report, .. } = next.result else {
        panic!("expected assignment, got {:?}", next.result);
    };
    assert_eq!(report.outcome, DispatchOutcome::Assigned { station_id: police.id.clone() });
}

#[tokio::test]
async fn test_pipeline_pass_superseded_by_reroute() {
    let fx = Fixture::new().await;
    let hospital = fx.station("Hospital 1 - Wakad", StationType::Hospital, GeoPoint::new(18.5135, 73.7604));
    let police = fx.station(
        "Police Station 1 - Pimpri",
        StationType::Police,
        GeoPoint::new(18.6073, 73.7654),
    );
    let need = fx.verified_need();

    let pipeline = DispatchPipeline::new(
        fx.store.clone(),
        AlertDispatcher::new(
            fx.store.clone(),
            RerouteDuringPush {
                responses: fx.responses.clone(),
                incident_id: need.id.clone(),
                target: police.id.clone(),
                fired: AtomicBool::new(false),
            },
            Origin::default(),
            Duration::from_secs(5),
        ),
        Arc::new(DirectRoutePlanner),
        3,
    );

    let first = pipeline.dispatch_next().await.unwrap().unwrap();
    let PipelineResult::Superseded { alert_id: Some(alert_id) } = &first.result else {
        panic!("expected the pass to be superseded, got {:?}", first.result);
    };
    let alert = fx.store.get_alert(alert_id).unwrap().unwrap();
    assert_eq!(alert.status, AlertStatus::Cancelled);
    assert_eq!(alert.deliveries[0].station_id, hospital.id);

    let loaded = fx.store.require_incident(&need.id).unwrap();
    assert!(loaded.assigned_station.is_none());
    assert_eq!(loaded.rerouted_to_station.as_ref().unwrap().id, police.id);
    assert!(fx.store.missions_for_incident(&need.id).unwrap().is_empty());

    let second = pipeline.dispatch_next().await.unwrap().unwrap();
    assert!(second.rerouted);
    let PipelineResult::Assigned { report, .. } = second.result else {
        panic!("expected assignment, got {:?}", second.result);
    };
    assert_eq!(report.outcome, DispatchOutcome::Assigned { station_id: police.id.clone() });
    assert_eq!(
        fx.store.require_incident(&need.id).unwrap().assigned_station.unwrap().id,
        police.id
    );
}

#[tokio::test]
async fn test_simultaneous_rejections_return_incident_once() {
    let fx = Fixture::new().await;
    let a = fx.station("Hospital 1 - Wakad", StationType::Hospital, GeoPoint::new(18.5135, 73.7604));
    let b = fx.station("Hospital 2 - Hadapsar", StationType::Hospital, GeoPoint::new(18.4852, 73.9047));
    let need = fx.claimed_need();
    let alert_id = fx.dispatch_to_both(&need, &a, &b).await;

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [&a, &b]
        .into_iter()
        .map(|station| {
            let responses = fx.responses.clone();
            let barrier = Arc::clone(&barrier);
            let callback = fx.callback(&alert_id, station, rejected("no capacity"));
            thread::spawn(move || {
                barrier.wait();
                responses.handle(callback)
            })
        })
        .collect();
    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.all_rejected).count(), 1);
    assert!(outcomes
        .iter()
        .all(|o| o.delivery_status == DeliveryStatus::Rejected));

    let alert = fx.store.get_alert(&alert_id).unwrap().unwrap();
    assert_eq!(alert.status, AlertStatus::Cancelled);
    assert!(alert
        .deliveries
        .iter()
        .all(|d| d.delivery_status == DeliveryStatus::Rejected));

    let loaded = fx.store.require_incident(&need.id).unwrap();
    assert_eq!(loaded.status, LifecycleStatus::Need(NeedStatus::Verified));
    assert_eq!(loaded.emergency_status, EmergencyStatus::Rejected);
    assert_eq!(loaded.rejected_station_ids.len(), 2);

    let returned = fx
        .store
        .events_for_incident(&need.id)
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == EventKind::AllStationsRejected)
        .count();
    assert_eq!(returned, 1);
}
