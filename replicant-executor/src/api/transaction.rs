//! Stored transaction API Handlers
//!
//! CRUD over the transaction store plus running a stored transaction.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use replicant_core::{TransactionConfig, TransactionResult};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /api/v1/transaction
/// Validate and store a transaction, replacing one with the same name
pub async fn create_transaction(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<TransactionConfig>)> {
    let config: TransactionConfig = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid transaction: {}", e)))?;

    if config.name.trim().is_empty() {
        return Err(ApiError::BadRequest("transaction name cannot be empty".to_string()));
    }
    state
        .executor
        .validate(&config)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!("Storing transaction: {}", config.name);
    state.store.set(&config.name, &config)?;

    Ok((StatusCode::CREATED, Json(config)))
}

/// GET /api/v1/transaction
/// List stored transactions, sorted by name
pub async fn list_transactions(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<TransactionConfig>>> {
    tracing::debug!("Listing transactions");

    let mut configs = Vec::new();
    state.store.iter(&mut |_, config| {
        configs.push(config);
        true
    })?;
    configs.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(configs))
}

/// GET /api/v1/transaction/{name}
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TransactionConfig>> {
    tracing::debug!("Getting transaction: {}", name);
    Ok(Json(state.store.get(&name)?))
}

/// DELETE /api/v1/transaction/{name}
pub async fn delete_transaction(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting transaction: {}", name);
    state.store.delete(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/transaction/{name}/run
/// Run a stored transaction under a fresh run identifier
pub async fn run_stored_transaction(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TransactionResult>> {
    let config = state.store.get(&name)?;
    let id = Uuid::new_v4().to_string();

    tracing::info!(transaction = %name, run = %id, "Running stored transaction");
    Ok(Json(state.executor.run(&id, config).await))
}
