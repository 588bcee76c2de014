//! On-demand run endpoint

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use replicant_core::{TransactionConfig, TransactionError, TransactionResult};
use serde_json::Value as JsonValue;

use crate::api::AppState;

/// POST /api/v1/run/{uuid}
///
/// Always answers with a result. A body that is not a valid config yields a
/// 400 whose result carries whatever name, driver and metadata could be read.
pub async fn run_transaction(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<TransactionResult>) {
    let config = match serde_json::from_slice::<TransactionConfig>(&body) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(run = %uuid, "Rejected run request: {}", e);
            let partial = partial_config(&body);
            let result = TransactionResult::failed(
                &uuid,
                &partial,
                TransactionError::Configuration(format!("invalid request body: {}", e)),
            );
            return (StatusCode::BAD_REQUEST, Json(result));
        }
    };

    tracing::info!(transaction = %config.name, run = %uuid, driver = %config.driver, "Running transaction");
    let result = state.executor.run(&uuid, config).await;
    (StatusCode::OK, Json(result))
}

/// Reads the identifying fields of a body that did not parse as a config
fn partial_config(body: &[u8]) -> TransactionConfig {
    let Ok(JsonValue::Object(fields)) = serde_json::from_slice::<JsonValue>(body) else {
        return TransactionConfig::default();
    };

    let text = |key: &str| {
        fields
            .get(key)
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let metadata = fields
        .get("metadata")
        .and_then(JsonValue::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    TransactionConfig {
        name: text("name"),
        driver: text("driver"),
        metadata,
        ..Default::default()
    }
}
