//! Isolated browsing context for one run

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CdpConnection, CdpError, CdpResult, CdpSession};

/// How long disposing a browser context may take before the connection is let go
pub const DISPOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A page inside its own browser context
///
/// Cookies, storage and history are not shared with any other run. The
/// context is disposed by `close()`, or by `Drop` when the run is abandoned
/// midway (cancellation, early return).
pub struct IsolatedPage {
    conn: Arc<CdpConnection>,
    context_id: String,
    session: CdpSession,
    disposed: bool,
}

impl IsolatedPage {
    /// Creates a browser context, a blank target inside it and attaches to it
    pub async fn open(conn: Arc<CdpConnection>) -> CdpResult<Self> {
        let created = conn
            .send(
                "Target.createBrowserContext",
                json!({"disposeOnDetach": true}),
                None,
            )
            .await?;
        let context_id = string_field(&created, "browserContextId")?;

        // From here on the context is owned by a guard, even if attaching fails
        let mut guard = ContextGuard {
            conn: Some(conn.clone()),
            context_id: context_id.clone(),
        };

        let target = conn
            .send(
                "Target.createTarget",
                json!({"url": "about:blank", "browserContextId": context_id}),
                None,
            )
            .await?;
        let target_id = string_field(&target, "targetId")?;

        let attached = conn
            .send(
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
                None,
            )
            .await?;
        let session = CdpSession::new(conn.clone(), string_field(&attached, "sessionId")?);

        session.call("Page.enable", json!({})).await?;
        session.call("Runtime.enable", json!({})).await?;

        guard.conn = None;
        debug!(context = %context_id, target = %target_id, "Opened isolated page");

        Ok(Self {
            conn,
            context_id,
            session,
            disposed: false,
        })
    }

    pub fn session(&self) -> &CdpSession {
        &self.session
    }

    /// Evaluates a JavaScript expression and returns its value
    ///
    /// Promises are awaited. A thrown exception is reported as a protocol
    /// error carrying the exception text.
    pub async fn evaluate(&self, expression: &str) -> CdpResult<Value> {
        let response = self
            .session
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("uncaught exception")
                .to_string();
            return Err(CdpError::Protocol {
                method: "Runtime.evaluate".to_string(),
                code: 0,
                message,
            });
        }

        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Disposes the browser context and waits for the renderer to confirm
    pub async fn close(mut self) -> CdpResult<()> {
        self.disposed = true;
        dispose(&self.conn, &self.context_id, DISPOSE_TIMEOUT).await
    }
}

impl Drop for IsolatedPage {
    fn drop(&mut self) {
        if !self.disposed {
            spawn_dispose(self.conn.clone(), self.context_id.clone(), DISPOSE_TIMEOUT);
        }
    }
}

/// Disposes a half-built context if `open` bails out
struct ContextGuard {
    conn: Option<Arc<CdpConnection>>,
    context_id: String,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            spawn_dispose(conn, std::mem::take(&mut self.context_id), DISPOSE_TIMEOUT);
        }
    }
}

async fn dispose(conn: &CdpConnection, context_id: &str, limit: Duration) -> CdpResult<()> {
    let params = json!({"browserContextId": context_id});
    let reply = conn.send("Target.disposeBrowserContext", params, None);
    match tokio::time::timeout(limit, reply).await {
        Ok(reply) => reply.map(|_| ()),
        Err(_) => Err(CdpError::Timeout("Target.disposeBrowserContext".to_string())),
    }
}

/// Disposes in the background; the task and its hold on the connection end
/// after `limit` at the latest
fn spawn_dispose(conn: Arc<CdpConnection>, context_id: String, limit: Duration) {
    if conn.is_closed() {
        return;
    }
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            if let Err(e) = dispose(&conn, &context_id, limit).await {
                warn!(context = %context_id, "Failed to dispose browser context: {}", e);
            }
        });
    }
}

fn string_field(value: &Value, field: &str) -> CdpResult<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CdpError::Protocol {
            method: field.to_string(),
            code: 0,
            message: format!("response is missing '{}'", field),
        })
}
