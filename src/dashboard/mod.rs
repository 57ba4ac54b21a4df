//! Read-mostly JSON dashboard over the keeper's state.
//!
//! Exposes exactly the surface external scripts need: paginated roster
//! reads, job tables, the event history, and bulk register/deregister
//! (executed as the relay).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::error::KeeperError;
use crate::events::{EventBus, EventRecord};
use crate::manager::LifecycleManager;
use crate::roster::Address;
use crate::watchdog::FundingWatchdog;

#[derive(Clone)]
pub struct DashboardState {
    pub managers: Vec<(String, Arc<RwLock<LifecycleManager>>)>,
    pub watchdog: Arc<RwLock<FundingWatchdog>>,
    pub events: EventBus,
    /// Register/deregister requests are executed with this caller identity.
    pub relay: Address,
}

#[derive(Serialize)]
struct ManagerSummary {
    name: String,
    entities: usize,
    active_entities: usize,
    active_jobs: usize,
    cancelled_jobs: usize,
    withdrawn_jobs: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    managers: Vec<ManagerSummary>,
    watchdog_balance: u128,
    watched_jobs: usize,
}

#[derive(Serialize)]
struct EntitySlotResponse {
    index: usize,
    address: Option<Address>,
}

#[derive(Serialize)]
struct JobResponse {
    id: String,
    start: usize,
    end: usize,
    state: String,
    removed: u32,
    cursor: usize,
    active_entities: usize,
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_count")]
    count: usize,
}

fn default_count() -> usize {
    100
}

#[derive(Deserialize)]
struct EventsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    200
}

#[derive(Deserialize)]
struct MembershipRequest {
    entities: Vec<Address>,
}

#[derive(Serialize)]
struct MembershipResponse {
    accepted: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/status", get(status_handler))
        .route("/api/events", get(events_handler))
        .route("/api/managers/:name/entities", get(entities_handler))
        .route("/api/managers/:name/jobs", get(jobs_handler))
        .route("/api/managers/:name/register", post(register_handler))
        .route("/api/managers/:name/deregister", post(deregister_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

fn find_manager(
    state: &DashboardState,
    name: &str,
) -> Result<Arc<RwLock<LifecycleManager>>, (StatusCode, Json<ErrorResponse>)> {
    state
        .managers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, m)| m.clone())
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: KeeperError::UnknownManager(name.to_string()).to_string(),
                }),
            )
        })
}

fn error_status(e: &KeeperError) -> StatusCode {
    match e {
        KeeperError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        KeeperError::Registry(_) => StatusCode::BAD_GATEWAY,
        KeeperError::UnknownManager(_) | KeeperError::JobNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn status_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let mut managers = Vec::new();
    for (name, manager) in &state.managers {
        let manager = manager.read().await;
        let jobs = manager.jobs();
        managers.push(ManagerSummary {
            name: name.clone(),
            entities: manager.entity_count(),
            active_entities: manager.active_entity_count(),
            active_jobs: jobs.iter().filter(|j| j.state.is_active()).count(),
            cancelled_jobs: jobs
                .iter()
                .filter(|j| !j.state.is_active() && !j.state.is_withdrawn())
                .count(),
            withdrawn_jobs: jobs.iter().filter(|j| j.state.is_withdrawn()).count(),
        });
    }
    let watchdog = state.watchdog.read().await;
    Json(StatusResponse {
        managers,
        watchdog_balance: watchdog.balance(),
        watched_jobs: watchdog.watch_list().len(),
    })
}

async fn events_handler(
    State(state): State<DashboardState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<EventRecord>> {
    Json(state.events.recent(query.limit))
}

async fn entities_handler(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<EntitySlotResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let manager = find_manager(&state, &name)?;
    let manager = manager.read().await;
    let slots = manager
        .entities(query.offset, query.count)
        .into_iter()
        .map(|(index, address)| EntitySlotResponse { index, address })
        .collect();
    Ok(Json(slots))
}

async fn jobs_handler(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<JobResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let manager = find_manager(&state, &name)?;
    let manager = manager.read().await;
    let jobs = manager
        .jobs()
        .iter()
        .map(|job| JobResponse {
            id: job.id.to_string(),
            start: job.start(),
            end: job.end(),
            state: job.state.label().to_string(),
            removed: job.removed,
            cursor: job.worker.cursor(),
            active_entities: manager.job_active_count(job.id).unwrap_or(0),
        })
        .collect();
    Ok(Json(jobs))
}

async fn register_handler(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
    Json(payload): Json<MembershipRequest>,
) -> Result<Json<MembershipResponse>, (StatusCode, Json<ErrorResponse>)> {
    let manager = find_manager(&state, &name)?;
    let relay = state.relay;
    let accepted = manager
        .write()
        .await
        .register(relay, &payload.entities)
        .await
        .map_err(|e| {
            (
                error_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })?;
    Ok(Json(MembershipResponse { accepted }))
}

async fn deregister_handler(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
    Json(payload): Json<MembershipRequest>,
) -> Result<Json<MembershipResponse>, (StatusCode, Json<ErrorResponse>)> {
    let manager = find_manager(&state, &name)?;
    let relay = state.relay;
    let accepted = manager
        .write()
        .await
        .deregister(relay, &payload.entities)
        .await
        .map_err(|e| {
            (
                error_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })?;
    Ok(Json(MembershipResponse { accepted }))
}
