//! HTTP request/response API.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::dto::{
    CreateSessionRequest, CreateSessionResponse, HealthResponse, HeartbeatRequest,
    HeartbeatResponse, JoinSessionRequest, JoinSessionResponse, LeaveSessionRequest,
    LeaveSessionResponse, ListQuery, ListSessionsResponse, TrackTicketRequest,
    UpdateSessionRequest,
};
use super::error::{panic_response, ApiError};
use super::Coordinator;
use crate::coordinator::{
    CoordinatorError, JoinRequest, SessionFilter, SessionId, SessionSnapshot, SessionSpec,
};
use crate::tracks::TrackAvailability;

/// Header carrying the host token on `PATCH` and `DELETE`.
pub const HOST_TOKEN_HEADER: &str = "x-host-token";

type ApiResult<T> = Result<T, ApiError>;

/// Build the API router.
pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session).get(list_sessions))
        .route(
            "/sessions/{id}",
            get(get_session).patch(update_session).delete(close_session),
        )
        .route("/sessions/{id}/join", post(join_session))
        .route("/sessions/{id}/leave", post(leave_session))
        .route("/sessions/{id}/heartbeat", post(heartbeat))
        .route("/sessions/{id}/track-ticket", post(track_ticket))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

async fn health(State(coordinator): State<Arc<Coordinator>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: coordinator.registry().len().await,
        subscribers: coordinator.notifier().subscriber_count(),
    })
}

async fn create_session(
    State(coordinator): State<Arc<Coordinator>>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreateSessionResponse>)> {
    let Json(req) = body?;

    let mut candidates = req.candidates;
    if candidates.is_empty() {
        if let Some(address) = client_address(&headers, &extensions) {
            candidates.push(coordinator.fallback_candidate(address, req.game_port));
        }
    }

    let spec = SessionSpec {
        host: req.host,
        host_candidates: candidates,
        room: req.room,
        track_hash: req.track_hash,
        track_size: req.track_size,
        max_pilots: req.max_pilots,
        max_spectators: req.max_spectators,
        password: req.password,
        download_allowed: req.download_allowed,
    };

    let created = coordinator.create_session(spec).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: created.session_id,
            host_token: created.host_token,
            session: created.snapshot,
        }),
    ))
}

async fn list_sessions(
    State(coordinator): State<Arc<Coordinator>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<ListSessionsResponse>> {
    let Query(query) = query?;
    let filter = SessionFilter {
        game_mode: query.mode,
        available_only: query.available,
    };

    let sessions = coordinator.list_sessions(&filter).await;
    Ok(Json(ListSessionsResponse {
        count: sessions.len(),
        sessions,
    }))
}

async fn get_session(
    State(coordinator): State<Arc<Coordinator>>,
    id: Result<Path<SessionId>, PathRejection>,
) -> ApiResult<Json<SessionSnapshot>> {
    let Path(id) = id?;
    Ok(Json(coordinator.get_session(id).await?))
}

async fn update_session(
    State(coordinator): State<Arc<Coordinator>>,
    id: Result<Path<SessionId>, PathRejection>,
    headers: HeaderMap,
    body: Result<Json<UpdateSessionRequest>, JsonRejection>,
) -> ApiResult<Json<SessionSnapshot>> {
    let Path(id) = id?;
    let Json(req) = body?;
    let token = host_token(&headers)?;

    Ok(Json(coordinator.update_session(id, token, req.into()).await?))
}

async fn close_session(
    State(coordinator): State<Arc<Coordinator>>,
    id: Result<Path<SessionId>, PathRejection>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    let token = host_token(&headers)?;

    coordinator.close_session(id, token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn join_session(
    State(coordinator): State<Arc<Coordinator>>,
    id: Result<Path<SessionId>, PathRejection>,
    body: Result<Json<JoinSessionRequest>, JsonRejection>,
) -> ApiResult<Json<JoinSessionResponse>> {
    let Path(id) = id?;
    let Json(req) = body?;

    let request = JoinRequest {
        player: req.player,
        as_spectator: req.as_spectator,
        password: req.password,
        local_tracks: req.local_tracks.into_iter().collect(),
        candidates: req.candidates,
    };

    let outcome = coordinator.join(id, request).await?;
    Ok(Json(outcome.into()))
}

async fn leave_session(
    State(coordinator): State<Arc<Coordinator>>,
    id: Result<Path<SessionId>, PathRejection>,
    body: Result<Json<LeaveSessionRequest>, JsonRejection>,
) -> ApiResult<Json<LeaveSessionResponse>> {
    let Path(id) = id?;
    let Json(req) = body?;

    let outcome = coordinator
        .leave(id, &req.player_id, req.host_token.as_deref())
        .await?;
    Ok(Json(outcome.into()))
}

async fn heartbeat(
    State(coordinator): State<Arc<Coordinator>>,
    id: Result<Path<SessionId>, PathRejection>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> ApiResult<Json<HeartbeatResponse>> {
    let Path(id) = id?;
    let Json(req) = body?;

    let last_heartbeat = coordinator.heartbeat(id, &req.host_token).await?;
    Ok(Json(HeartbeatResponse {
        session_id: id,
        last_heartbeat,
        timeout_secs: coordinator.settings().session_timeout().as_secs(),
    }))
}

async fn track_ticket(
    State(coordinator): State<Arc<Coordinator>>,
    id: Result<Path<SessionId>, PathRejection>,
    body: Result<Json<TrackTicketRequest>, JsonRejection>,
) -> ApiResult<Json<TrackAvailability>> {
    let Path(id) = id?;
    let Json(req) = body?;
    let catalog = req.catalog();

    let availability = coordinator
        .renegotiate_track(id, &req.player_id, &catalog, req.failure)
        .await?;
    Ok(Json(availability))
}

fn host_token(headers: &HeaderMap) -> ApiResult<&str> {
    headers
        .get(HOST_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError(CoordinatorError::Unauthorized))
}

/// Address of the calling client: first `X-Forwarded-For` hop, else the peer address.
fn client_address(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    forwarded.or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}
