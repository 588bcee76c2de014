//! API Module
//!
//! HTTP boundary of the executor. Each submodule handles one group of
//! endpoints.

pub mod error;
pub mod health;
pub mod run;
pub mod transaction;

use axum::{
    Router,
    routing::{get, post},
};
use replicant_store::Store;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::executor::Executor;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
    pub store: Arc<dyn Store>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Runs
        .route("/api/v1/run/{uuid}", post(run::run_transaction))
        // Stored transactions
        .route(
            "/api/v1/transaction",
            post(transaction::create_transaction).get(transaction::list_transactions),
        )
        .route(
            "/api/v1/transaction/{name}",
            get(transaction::get_transaction).delete(transaction::delete_transaction),
        )
        .route(
            "/api/v1/transaction/{name}/run",
            post(transaction::run_stored_transaction),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ScriptDriver;
    use crate::executor::DedupPolicy;
    use replicant_core::{TransactionConfig, TransactionResult};
    use reqwest::StatusCode;
    use serde_json::json;

    const SCRIPT: &str = r#"
        function Run(ctx)
            local rr = replicant.NewResult()
            rr.Message = "hello {{ who }}"
            return rr:JSON()
        end
    "#;

    async fn spawn_api() -> String {
        let mut executor = Executor::new(DedupPolicy::Reject);
        executor.register(Arc::new(ScriptDriver::new(reqwest::Client::new())));
        let state = AppState {
            executor: Arc::new(executor),
            store: replicant_store::open("memory:").unwrap(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(name: &str) -> serde_json::Value {
        json!({
            "name": name,
            "driver": "script",
            "timeout": "5s",
            "inputs": {"who": "world"},
            "metadata": {"application": "api-test"},
            "script": SCRIPT,
        })
    }

    #[tokio::test]
    async fn test_health() {
        let base = spawn_api().await;
        let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_run_endpoint() {
        let base = spawn_api().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/api/v1/run/abc-123", base))
            .json(&config("greeting"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let result: TransactionResult = resp.json().await.unwrap();
        assert!(!result.failed, "{:?}", result.error);
        assert_eq!(result.uuid, "abc-123");
        assert_eq!(result.message, "hello world");
        assert_eq!(result.metadata["application"], "api-test");
    }

    #[tokio::test]
    async fn test_run_with_unknown_driver_is_a_result() {
        let base = spawn_api().await;
        let mut body = config("greeting");
        body["driver"] = json!("teleport");

        let resp = reqwest::Client::new()
            .post(format!("{}/api/v1/run/abc", base))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let result: TransactionResult = resp.json().await.unwrap();
        assert!(result.failed);
        assert_eq!(result.error.unwrap().kind(), "configuration");
        assert_eq!(result.driver, "teleport");
    }

    #[tokio::test]
    async fn test_run_with_malformed_body() {
        let base = spawn_api().await;

        let resp = reqwest::Client::new()
            .post(format!("{}/api/v1/run/abc", base))
            .body(r#"{"name": "broken", "metadata": {"application": "x"}, "timeout": 5}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let result: TransactionResult = resp.json().await.unwrap();
        assert!(result.failed);
        assert_eq!(result.name, "broken");
        assert_eq!(result.metadata["application"], "x");
    }

    #[tokio::test]
    async fn test_transaction_crud_and_run() {
        let base = spawn_api().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/api/v1/transaction", base))
            .json(&config("b-second"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        client
            .post(format!("{}/api/v1/transaction", base))
            .json(&config("a-first"))
            .send()
            .await
            .unwrap();

        let listed: Vec<TransactionConfig> = client
            .get(format!("{}/api/v1/transaction", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let names: Vec<&str> = listed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a-first", "b-second"]);

        let stored: TransactionConfig = client
            .get(format!("{}/api/v1/transaction/a-first", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stored.timeout, "5s");

        let result: TransactionResult = client
            .post(format!("{}/api/v1/transaction/a-first/run", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!result.failed, "{:?}", result.error);
        assert_eq!(result.name, "a-first");
        assert!(uuid::Uuid::parse_str(&result.uuid).is_ok());

        let resp = client
            .delete(format!("{}/api/v1/transaction/a-first", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        for resp in [
            client.get(format!("{}/api/v1/transaction/a-first", base)).send().await.unwrap(),
            client.delete(format!("{}/api/v1/transaction/a-first", base)).send().await.unwrap(),
            client.post(format!("{}/api/v1/transaction/a-first/run", base)).send().await.unwrap(),
        ] {
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_transaction() {
        let base = spawn_api().await;
        let client = reqwest::Client::new();

        let mut unresolved = config("bad");
        unresolved["inputs"] = json!({});
        let mut unnamed = config("");
        unnamed["name"] = json!("  ");
        let mut bad_timeout = config("bad");
        bad_timeout["timeout"] = json!("whenever");

        for body in [unresolved, unnamed, bad_timeout] {
            let resp = client
                .post(format!("{}/api/v1/transaction", base))
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", body);
        }
    }
}
