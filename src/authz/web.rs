use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::authz::errors::AuthzError;
use crate::authz::registry::PointRegistry;
use crate::authz::types::{
    DecideRequest, DecideResponse, Identity, PoliciesQuery, PoliciesResponse, PointSummary,
};

pub fn router(registry: Arc<PointRegistry>) -> Router {
    Router::new()
        .route("/v1/decide", post(handle_decide))
        .route("/v1/points", get(handle_points))
        .route("/v1/points/:alias/policies", get(handle_policies))
        .route("/healthz", get(health))
        .with_state(registry)
}

async fn handle_decide(
    State(registry): State<Arc<PointRegistry>>,
    Json(req): Json<DecideRequest>,
) -> impl IntoResponse {
    let Some(point) = registry.get(&req.point) else {
        return AuthzError::UndefinedPoint(req.point).into_response();
    };
    match point.decide(&req.identity(), &req.resource, &req.context) {
        Ok(decision) => Json(DecideResponse::from(decision)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_points(State(registry): State<Arc<PointRegistry>>) -> impl IntoResponse {
    let points: Vec<PointSummary> = registry
        .points()
        .map(|p| PointSummary::from(p.definition()))
        .collect();
    Json(points)
}

async fn handle_policies(
    State(registry): State<Arc<PointRegistry>>,
    Path(alias): Path<String>,
    Query(query): Query<PoliciesQuery>,
) -> impl IntoResponse {
    let Some(point) = registry.get(&alias) else {
        return AuthzError::UndefinedPoint(alias).into_response();
    };
    let identity = match query.token {
        Some(token) => Identity::token(token, query.principal),
        None => Identity::user(query.principal),
    };
    match point.get_policies(&identity) {
        Ok(set) => Json(PoliciesResponse {
            point: alias,
            policies: set.names(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
