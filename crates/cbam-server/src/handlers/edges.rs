//! Edge CRUD and incremental propagation handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use cbam_core::id::{EdgeId, ProcessId};

use super::begin_run;
use crate::error::ApiError;
use crate::schema::edges::{
    CreateEdgeRequest, EdgeMutationResponse, EdgeView, ListEdgesQuery, ListEdgesResponse,
    PropagateQuery, PropagateResponse, UpdateEdgeRequest,
};
use crate::state::AppState;

/// `POST /edges`
pub async fn create_edge(
    State(state): State<AppState>,
    Json(req): Json<CreateEdgeRequest>,
) -> Result<(StatusCode, Json<EdgeMutationResponse>), ApiError> {
    let new_edge = req.to_new_edge()?;
    let _run = begin_run(&state, "create_edge")?;
    let mut service = state.service.lock().await;
    let (edge, propagation) = service.create_edge(new_edge)?;
    Ok((
        StatusCode::CREATED,
        Json(EdgeMutationResponse {
            edge: edge.into(),
            propagation,
        }),
    ))
}

/// `GET /edges`
pub async fn list_edges(
    State(state): State<AppState>,
    Query(query): Query<ListEdgesQuery>,
) -> Result<Json<ListEdgesResponse>, ApiError> {
    let filter = query.to_filter()?;
    let service = state.service.lock().await;
    let edges = service.list_edges(&filter)?;
    Ok(Json(ListEdgesResponse {
        edges: edges.into_iter().map(EdgeView::from).collect(),
    }))
}

/// `GET /edges/{id}`
pub async fn get_edge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<EdgeView>, ApiError> {
    let service = state.service.lock().await;
    Ok(Json(service.get_edge(EdgeId(id))?.into()))
}

/// `PUT /edges/{id}`
pub async fn update_edge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateEdgeRequest>,
) -> Result<Json<EdgeMutationResponse>, ApiError> {
    let _run = begin_run(&state, "update_edge")?;
    let mut service = state.service.lock().await;
    let current = service.get_edge(EdgeId(id))?;
    let update = req.to_update(&current)?;
    let (edge, propagation) = service.update_edge(EdgeId(id), update)?;
    Ok(Json(EdgeMutationResponse {
        edge: edge.into(),
        propagation,
    }))
}

/// `DELETE /edges/{id}`
pub async fn delete_edge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let _run = begin_run(&state, "delete_edge")?;
    let mut service = state.service.lock().await;
    let (_, propagation) = service.delete_edge(EdgeId(id))?;
    tracing::debug!(edge = id, updated = propagation.updated_node_count, "edge removed");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /edges/propagate?source_process_id=..&target_process_id=..`
///
/// Creates the `continue` edge between the two processes if it does not
/// exist yet, then propagates from it.
pub async fn propagate(
    State(state): State<AppState>,
    Query(query): Query<PropagateQuery>,
) -> Result<Json<PropagateResponse>, ApiError> {
    let _run = begin_run(&state, "propagate_from_edge")?;
    let mut service = state.service.lock().await;
    let (edge, created, propagation) = service.propagate_between(
        ProcessId(query.source_process_id),
        ProcessId(query.target_process_id),
    )?;
    Ok(Json(PropagateResponse {
        edge: edge.into(),
        created,
        propagation,
    }))
}
