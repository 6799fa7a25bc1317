//! Emission ledger and recalculation handlers.

use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::Json;

use cbam_core::id::{EdgeId, ProcessId, ProductId};

use super::begin_run;
use crate::error::ApiError;
use crate::schema::common::parse_quantity;
use crate::schema::emissions::{
    ChainSummaryView, ProcessEmissionUpdateResponse, ProcessEmissionView,
    ProductEmissionUpdateResponse, ProductEmissionView, RecalculateRequest, RecalculateResponse,
    SetProcessEmissionRequest, SetProductEmissionRequest,
};
use crate::service::RecomputeOptions;
use crate::state::AppState;

/// `POST /emissions/graph/recalculate`
///
/// Runs on the blocking pool: a full recompute over a large graph does many
/// synchronous SQLite writes.
pub async fn recalculate(
    State(state): State<AppState>,
    Json(req): Json<RecalculateRequest>,
) -> Result<Json<RecalculateResponse>, ApiError> {
    let run = begin_run(&state, "recompute_graph")?;
    let run_id = run.run_id();
    let mut service = state.service.clone().lock_owned().await;

    // The deadline covers the run itself, not the wait for the service.
    let options = RecomputeOptions {
        trigger_edge: req.trigger_edge_id.map(EdgeId),
        include_validation: req.include_validation,
        deadline: req
            .deadline_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms)),
    };
    let report = tokio::task::spawn_blocking(move || {
        let report = service.recompute_graph(&options);
        drop(run);
        report
    })
    .await
    .map_err(|e| ApiError::InternalError(format!("recalculation task failed: {}", e)))??;

    Ok(Json(RecalculateResponse {
        run_id,
        result: report.result,
        violations: report
            .violations
            .map(|vs| vs.into_iter().map(Into::into).collect()),
    }))
}

/// `GET /emissions/process/{id}`
pub async fn get_process(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProcessEmissionView>, ApiError> {
    let service = state.service.lock().await;
    Ok(Json(service.process_emission(ProcessId(id))?.into()))
}

/// `PUT /emissions/process/{id}`
pub async fn set_process(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SetProcessEmissionRequest>,
) -> Result<Json<ProcessEmissionUpdateResponse>, ApiError> {
    let direct = parse_quantity("direct_emission", req.direct_emission)?;
    let _run = begin_run(&state, "set_process_emission")?;
    let mut service = state.service.lock().await;
    let (emission, propagation) = service.set_process_direct(ProcessId(id), direct)?;
    Ok(Json(ProcessEmissionUpdateResponse {
        emission: emission.into(),
        propagation,
    }))
}

/// `GET /emissions/product/{id}`
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProductEmissionView>, ApiError> {
    let service = state.service.lock().await;
    Ok(Json(service.product_emission(ProductId(id))?.into()))
}

/// `PUT /emissions/product/{id}`
pub async fn set_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SetProductEmissionRequest>,
) -> Result<Json<ProductEmissionUpdateResponse>, ApiError> {
    let amounts = req.to_amounts()?;
    let _run = begin_run(&state, "set_product_emission")?;
    let mut service = state.service.lock().await;
    let (emission, propagation) = service.set_product_amounts(ProductId(id), amounts)?;
    Ok(Json(ProductEmissionUpdateResponse {
        emission: emission.into(),
        propagation,
    }))
}

/// `GET /emissions/chain-summary/{chain_id}`
pub async fn chain_summary(
    State(state): State<AppState>,
    Path(chain_id): Path<i64>,
) -> Result<Json<ChainSummaryView>, ApiError> {
    let service = state.service.lock().await;
    Ok(Json(service.chain_summary(ProcessId(chain_id))?.into()))
}
