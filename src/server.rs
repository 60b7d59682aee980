//! HTTP host for the routing engine.
//!
//! The host owns everything the core does not: input sanitisation,
//! admission control (a semaphore at 2x available cores), the per-query
//! deadline that drives the core's cancellation token, and the mapping of
//! core errors onto status codes.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;

use crate::route::{CancelToken, LatLng, RouteError, RouteResult, Router};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub query_timeout: Duration,
    pub max_concurrent: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            port: 8080,
            query_timeout: Duration::from_secs(5),
            max_concurrent: cores * 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatLngJson {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub start: LatLngJson,
    pub end: LatLngJson,
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub total_distance_meters: f64,
    pub segments: Vec<SegmentJson>,
}

#[derive(Debug, Serialize)]
pub struct SegmentJson {
    pub distance_meters: f64,
    pub geometry: Vec<LatLngJson>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub num_nodes: u32,
    pub num_fwd_edges: usize,
    pub num_bwd_edges: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

struct AppState {
    router: Arc<dyn Router>,
    semaphore: Semaphore,
    query_timeout: Duration,
    stats: StatsResponse,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, code: &str, field: Option<&str>) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            field: field.map(str::to_string),
        }),
    )
}

fn validate_coord(ll: LatLngJson) -> bool {
    ll.lat.is_finite()
        && ll.lng.is_finite()
        && (-90.0..=90.0).contains(&ll.lat)
        && (-180.0..=180.0).contains(&ll.lng)
}

fn to_response(result: RouteResult) -> RouteResponse {
    RouteResponse {
        total_distance_meters: result.total_distance_meters,
        segments: result
            .segments
            .into_iter()
            .map(|seg| SegmentJson {
                distance_meters: seg.distance_meters,
                geometry: seg
                    .geometry
                    .iter()
                    .map(|ll| LatLngJson {
                        lat: ll.lat,
                        lng: ll.lng,
                    })
                    .collect(),
            })
            .collect(),
    }
}

async fn route_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RouteRequest>,
) -> Result<Json<RouteResponse>, HandlerError> {
    if !validate_coord(req.start) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "invalid_coordinates",
            Some("start"),
        ));
    }
    if !validate_coord(req.end) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "invalid_coordinates",
            Some("end"),
        ));
    }

    let _permit = state
        .semaphore
        .acquire()
        .await
        .map_err(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None))?;

    let cancel = CancelToken::new();
    let router = state.router.clone();
    let task_cancel = cancel.clone();
    let start = LatLng {
        lat: req.start.lat,
        lng: req.start.lng,
    };
    let end = LatLng {
        lat: req.end.lat,
        lng: req.end.lng,
    };

    let task = tokio::task::spawn_blocking(move || router.route(&task_cancel, start, end));

    let result = match tokio::time::timeout(state.query_timeout, task).await {
        Err(_) => {
            // Deadline elapsed: cancel the core, which exits at its next
            // 256-iteration check.
            cancel.cancel();
            return Err(error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "request_timeout",
                None,
            ));
        }
        Ok(Err(_)) => {
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                None,
            ));
        }
        Ok(Ok(result)) => result,
    };

    match result {
        Ok(route) => Ok(Json(to_response(route))),
        Err(RouteError::PointTooFar(which)) => Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "point_too_far_from_road",
            Some(&which.to_string()),
        )),
        Err(RouteError::NoRoute) => Err(error_response(
            StatusCode::NOT_FOUND,
            "no_route_found",
            None,
        )),
        Err(RouteError::Cancelled) => Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "request_timeout",
            None,
        )),
        Err(RouteError::Internal(_)) => Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            None,
        )),
    }
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(state.stats.clone())
}

/// Runs the HTTP host until ctrl-c.
pub async fn run_server(
    router: Arc<dyn Router>,
    stats: StatsResponse,
    cfg: ServerConfig,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        router,
        semaphore: Semaphore::new(cfg.max_concurrent),
        query_timeout: cfg.query_timeout,
        stats,
    });

    let app = axum::Router::new()
        .route("/api/v1/route", post(route_handler))
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/stats", get(stats_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", cfg.port);
    info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
