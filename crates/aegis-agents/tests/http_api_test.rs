//! Exercises the HTTP surface against a real server on loopback, with an
//! axum app standing in for the severity service and a fire station.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use aegis_agents::config::AegisConfig;
use aegis_agents::runtime;
use aegis_agents::server;
use aegis_agents::workers::PollStep;
use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use coordination::incident::AnalysisStage;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Pushes(Arc<Mutex<Vec<(Option<String>, Value)>>>);

/// Severity service at `/severity`, station endpoint at `/station`.
async fn spawn_fakes() -> (SocketAddr, Pushes) {
    let pushes = Pushes::default();
    let app = Router::new()
        .route(
            "/severity",
            post(|Json(body): Json<Value>| async move {
                assert!(body["text"].as_str().unwrap_or_default().contains("fire"));
                Json(json!({"severity": 8, "needs": ["fire"], "summary": "Kitchen fire spreading"}))
            }),
        )
        .route(
            "/station",
            post(
                |State(pushes): State<Pushes>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    let key = headers
                        .get("x-api-key")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    pushes.0.lock().unwrap().push((key, body));
                    Json(json!({"received": true}))
                },
            ),
        )
        .with_state(pushes.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, pushes)
}

struct Harness {
    _dir: tempfile::TempDir,
    config: AegisConfig,
    base: String,
    client: reqwest::Client,
    cancel: Arc<CancellationToken>,
}

impl Harness {
    async fn start(extra: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("aegis.db").display().to_string();
        let mut pairs: Vec<(String, String)> = vec![("AEGIS_DB_PATH".into(), db)];
        pairs.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        let config = AegisConfig::from_lookup(move |key| {
            pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap();

        let store = runtime::open_store(&config).unwrap();
        let state = runtime::app_state(&config, &store).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let cancel = Arc::new(CancellationToken::new());
        {
            let cancel = cancel.clone();
            tokio::spawn(async move { server::serve(listener, state, cancel).await });
        }

        Self {
            _dir: dir,
            config,
            base,
            client: reqwest::Client::new(),
            cancel,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn register_fire_station(&self, endpoint: String) -> (String, String) {
        let (status, body) = self
            .post(
                "/api/stations",
                json!({
                    "name": "Fire Station - Swargate",
                    "type": "fire",
                    "location": {"lat": 18.4549, "lng": 73.8563},
                    "endpoint": endpoint,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let data = &body["data"];
        (
            data["id"].as_str().unwrap().to_string(),
            data["apiKey"].as_str().unwrap().to_string(),
        )
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[tokio::test]
async fn test_health_and_envelope() {
    let harness = Harness::start(&[]).await;
    let (status, body) = harness.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");

    let (status, body) = harness.get("/api/incidents/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["details"].is_string());
}

#[tokio::test]
async fn test_invalid_report_is_rejected_with_details_outside_production() {
    let harness = Harness::start(&[]).await;
    let (status, body) = harness
        .post("/api/reports", json!({"source": "sms", "text": "   "}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("text or media"));
    assert!(body["details"].is_string());

    let (status, body) = harness.post("/api/reports", json!({"text": "no source"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_production_hides_details() {
    let harness = Harness::start(&[("AEGIS_ENV", "production")]).await;
    let (status, body) = harness.get("/api/alerts/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn test_intake_is_rate_limited_per_client() {
    let harness = Harness::start(&[("AEGIS_RATE_LIMIT_PER_MINUTE", "2")]).await;
    let report = json!({"source": "sms", "text": "tree fell on the road"});

    for _ in 0..2 {
        let (status, _) = harness.post("/api/reports", report.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = harness.post("/api/reports", report).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["success"], false);

    // manager routes are not throttled
    let (status, _) = harness.get("/api/stations").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_need_verification_routes() {
    let harness = Harness::start(&[]).await;
    let (status, body) = harness
        .post(
            "/api/needs",
            json!({
                "rawMessage": "family of five needs drinking water",
                "triage": {"needType": "Water", "urgency": "High"},
                "location": {"lat": 18.5, "lng": 73.9},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["status"], "Unverified");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = harness.post(&format!("/api/needs/{id}/verify"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "Verified");

    let (status, _) = harness.post("/api/needs/missing/verify", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_callback_auth_failures() {
    let (fakes, _) = spawn_fakes().await;
    let harness = Harness::start(&[]).await;
    let (station_id, _key) = harness
        .register_fire_station(format!("http://{fakes}/station"))
        .await;

    let callback = |api_key: Option<&str>, station: &str| {
        let mut body = json!({"alertId": "any-alert", "stationId": station, "reason": "busy"});
        if let Some(key) = api_key {
            body["apiKey"] = json!(key);
        }
        body
    };

    let (status, body) = harness
        .post("/api/stations/callback/rejected", callback(None, &station_id))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = harness
        .post("/api/stations/callback/rejected", callback(Some("wrong"), &station_id))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = harness
        .post("/api/stations/callback/rejected", callback(Some("wrong"), "no-such-station"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = harness
        .post("/api/stations/callback/teleported", callback(Some("wrong"), &station_id))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_text_report_flows_to_resolution() {
    let (fakes, pushes) = spawn_fakes().await;
    let severity_url = format!("http://{fakes}/severity");
    let harness = Harness::start(&[("AEGIS_SEVERITY_URL", severity_url.as_str())]).await;
    let (station_id, api_key) = harness
        .register_fire_station(format!("http://{fakes}/station"))
        .await;

    let (status, body) = harness
        .post(
            "/api/reports",
            json!({
                "source": "sms",
                "text": "Kitchen fire spreading to the next flat",
                "location": {"lat": 18.52, "lng": 73.85},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["status"], "Pending");
    let incident_id = body["data"]["id"].as_str().unwrap().to_string();

    // one pass of the severity loop, then one pass of the dispatch loop
    let store = runtime::open_store(&harness.config).unwrap();
    let severity = runtime::analysis_step(&harness.config, &store, AnalysisStage::Severity)
        .unwrap()
        .unwrap();
    assert!(severity.step().await.unwrap());
    let dispatch = runtime::dispatch_step(&harness.config, &store).unwrap();
    assert!(dispatch.step().await.unwrap());
    assert!(!dispatch.step().await.unwrap());

    let (_, body) = harness.get(&format!("/api/incidents/{incident_id}")).await;
    let view = &body["data"];
    assert_eq!(view["incident"]["status"], "Clustered");
    assert_eq!(view["incident"]["emergencyStatus"], "assigned");
    assert_eq!(view["incident"]["assignedStation"]["type"], "fire");
    assert_eq!(view["missions"].as_array().unwrap().len(), 1);
    let alert_id = view["alerts"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(view["alerts"][0]["emergencyType"], "fire");

    {
        let pushes = pushes.0.lock().unwrap();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0.as_deref(), Some(api_key.as_str()));
        assert_eq!(pushes[0].1["alertId"], alert_id.as_str());
        assert_eq!(pushes[0].1["severity"], 8);
    }

    let (status, body) = harness
        .post(
            "/api/stations/callback/dispatched",
            json!({
                "alertId": alert_id,
                "stationId": station_id,
                "apiKey": api_key,
                "dispatchedUnits": ["Engine 4"],
                "estimatedArrival": "12 min",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["emergencyStatus"], "dispatched");
    assert_eq!(body["data"]["deliveryStatus"], "responding");

    let (status, body) = harness
        .post(
            "/api/stations/callback/resolved",
            json!({
                "alertId": alert_id,
                "stationId": station_id,
                "apiKey": api_key,
                "outcome": "extinguished",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["emergencyStatus"], "resolved");
    assert_eq!(body["data"]["status"], "Resolved");

    let (_, body) = harness.get(&format!("/api/alerts/{alert_id}")).await;
    assert_eq!(body["data"]["status"], "resolved");
    let (_, body) = harness.get(&format!("/api/incidents/{incident_id}")).await;
    assert!(body["data"]["missions"].as_array().unwrap().is_empty());

    // resolved alerts accept nothing further
    let (status, _) = harness
        .post(
            "/api/stations/callback/rejected",
            json!({"alertId": alert_id, "stationId": station_id, "apiKey": api_key}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
