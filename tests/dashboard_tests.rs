//! Dashboard API tests driven through the axum router with `oneshot`
//! requests, no real listener.

mod test_harness;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::time::{advance, Duration, Instant};
use tower::ServiceExt;

use keeper_lite::dashboard::{router, DashboardState};
use keeper_lite::roster::Address;

use test_harness::{test_config, TestKeeper, TEST_INTERVAL};

struct DashboardFixture {
    state: DashboardState,
    keeper_manager: Arc<RwLock<keeper_lite::manager::LifecycleManager>>,
}

async fn dashboard_fixture() -> (DashboardFixture, Vec<Address>, TestKeeperHandles) {
    let mut keeper = TestKeeper::new(test_config()).await;
    let entities = keeper.register_random(5).await;

    let handles = TestKeeperHandles {
        forwarder: keeper.forwarder,
        action: keeper.action.clone(),
    };
    let name = keeper.manager.name().to_string();
    let manager = Arc::new(RwLock::new(keeper.manager));
    let state = DashboardState {
        managers: vec![(name, manager.clone())],
        watchdog: keeper.watchdog,
        events: keeper.events,
        relay: keeper.relay,
    };

    (
        DashboardFixture {
            state,
            keeper_manager: manager,
        },
        entities,
        handles,
    )
}

struct TestKeeperHandles {
    forwarder: Address,
    action: Arc<keeper_lite::action::SimulatedAction>,
}

async fn get_json(state: DashboardState, uri: &str) -> (StatusCode, Value) {
    let response = router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn post_json(state: DashboardState, uri: &str, payload: Value) -> (StatusCode, Value) {
    let response = router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_managers_and_watchdog() {
    let (fx, _entities, _handles) = dashboard_fixture().await;

    let (status, json) = get_json(fx.state, "/api/status").await;
    assert_eq!(status, StatusCode::OK);

    let managers = json["managers"].as_array().unwrap();
    assert_eq!(managers.len(), 1);
    assert_eq!(managers[0]["name"], "gauge-distribution");
    assert_eq!(managers[0]["entities"], 5);
    assert_eq!(managers[0]["active_entities"], 5);
    assert_eq!(managers[0]["active_jobs"], 1);
    assert_eq!(json["watched_jobs"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_entities_endpoint_paginates_with_tombstones() {
    let (fx, entities, _handles) = dashboard_fixture().await;
    fx.keeper_manager
        .write()
        .await
        .deregister(fx.state.relay, &entities[1..2])
        .await
        .unwrap();

    let (status, json) = get_json(
        fx.state.clone(),
        "/api/managers/gauge-distribution/entities?offset=0&count=3",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let slots = json.as_array().unwrap();
    assert_eq!(slots.len(), 3);
    assert_eq!(slots[0]["index"], 0);
    assert!(slots[0]["address"].is_string());
    assert!(slots[1]["address"].is_null());
}

#[tokio::test(start_paused = true)]
async fn test_jobs_endpoint_exposes_ranges_and_state() {
    let (fx, _entities, _handles) = dashboard_fixture().await;

    let (status, json) = get_json(fx.state, "/api/managers/gauge-distribution/jobs").await;
    assert_eq!(status, StatusCode::OK);

    let jobs = json.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["start"], 0);
    assert_eq!(jobs[0]["end"], 5);
    assert_eq!(jobs[0]["state"], "active");
    assert_eq!(jobs[0]["active_entities"], 5);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_manager_is_404() {
    let (fx, _entities, _handles) = dashboard_fixture().await;
    let (status, _json) = get_json(fx.state, "/api/managers/nope/jobs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_register_endpoint_admits_entities_as_relay() {
    let (fx, _entities, _handles) = dashboard_fixture().await;
    let fresh = Address::random();

    let (status, json) = post_json(
        fx.state.clone(),
        "/api/managers/gauge-distribution/register",
        json!({ "entities": [fresh.to_string()] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["accepted"], 1);
    assert!(fx.keeper_manager.read().await.is_registered(&fresh));
}

#[tokio::test(start_paused = true)]
async fn test_deregister_endpoint_removes_entities() {
    let (fx, entities, _handles) = dashboard_fixture().await;

    let (status, json) = post_json(
        fx.state.clone(),
        "/api/managers/gauge-distribution/deregister",
        json!({ "entities": [entities[0].to_string()] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["accepted"], 1);
    assert_eq!(fx.keeper_manager.read().await.active_entity_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_events_endpoint_returns_recent_history() {
    let (fx, _entities, handles) = dashboard_fixture().await;

    advance(TEST_INTERVAL + Duration::from_secs(1)).await;
    let now = Instant::now();
    {
        let mut manager = fx.keeper_manager.write().await;
        let job_id = manager.active_job_ids()[0];
        while let Some(snapshot) = manager.check_due(job_id, now).unwrap() {
            let outcome = manager
                .run_batch(handles.forwarder, job_id, snapshot, now)
                .await
                .unwrap();
            if outcome.cycle_complete {
                break;
            }
        }
    }
    assert_eq!(handles.action.processed_count(), 5);

    let (status, json) = get_json(fx.state, "/api/events?limit=100").await;
    assert_eq!(status, StatusCode::OK);
    let events = json.as_array().unwrap();
    assert!(events.iter().any(|e| e["type"] == "batch_run"));
    assert!(events.iter().any(|e| e["type"] == "cycle_completed"));
    // Registration events from setup are present too.
    assert!(events.iter().any(|e| e["type"] == "entity_registered"));
}

#[tokio::test(start_paused = true)]
async fn test_index_serves_html() {
    let (fx, _entities, _handles) = dashboard_fixture().await;
    let response = router(fx.state)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(content_type.contains("text/html"));
}
