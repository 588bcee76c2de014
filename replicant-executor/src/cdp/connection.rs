//! Request/response correlation over a debugging WebSocket

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use super::{CdpError, CdpResult};

/// Outgoing request
#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Value,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

/// Any incoming message; responses have an `id`, events a `method`
#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RemoteError>,
    method: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    code: i64,
    message: String,
}

/// What a pending request eventually receives
enum Reply {
    Result(Value),
    Error(RemoteError),
    Closed,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Removes a pending entry when the request future completes or is dropped
struct PendingGuard<'a> {
    id: u64,
    pending: &'a PendingMap,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.lock().remove(&self.id).is_some() {
            trace!(id = self.id, "Dropped pending CDP request");
        }
    }
}

/// Browser-level debugging connection
///
/// Owns a writer task fed through a channel and a reader task that resolves
/// pending requests. Dropping the connection aborts both tasks, which closes
/// the socket.
pub struct CdpConnection {
    next_id: AtomicU64,
    pending: PendingMap,
    outbound: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl CdpConnection {
    /// Connects to a `webSocketDebuggerUrl`
    pub async fn connect(ws_url: &str) -> CdpResult<Self> {
        let (stream, _) = connect_async(ws_url).await?;
        let (mut sink, mut source) = stream.split();
        debug!(url = ws_url, "Connected to renderer");

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!("CDP write error: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let pending = pending.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => dispatch(&pending, &text),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            debug!("CDP read error: {}", e);
                            break;
                        }
                    }
                }

                // Fail everything still waiting; `send` checks `closed` under the same lock
                let mut pending = pending.lock();
                closed.store(true, Ordering::SeqCst);
                for (_, reply) in pending.drain() {
                    let _ = reply.send(Reply::Closed);
                }
            })
        };

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            outbound,
            closed,
            reader,
            writer,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends a request and waits for its response
    ///
    /// Dropping the returned future forgets the request; a late response is
    /// then ignored by the reader.
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> CdpResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if self.closed.load(Ordering::SeqCst) {
                return Err(CdpError::Closed);
            }
            pending.insert(id, tx);
        }
        let _guard = PendingGuard {
            id,
            pending: &self.pending,
        };

        let text = serde_json::to_string(&Request {
            id,
            method,
            params,
            session_id,
        })?;
        trace!(id, method, "CDP request");
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| CdpError::Closed)?;

        match rx.await {
            Ok(Reply::Result(value)) => Ok(value),
            Ok(Reply::Error(error)) => Err(CdpError::Protocol {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            }),
            Ok(Reply::Closed) | Err(_) => Err(CdpError::Closed),
        }
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn dispatch(pending: &PendingMap, text: &str) {
    let message: Incoming = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("Ignoring malformed CDP message: {}", e);
            return;
        }
    };

    match message.id {
        Some(id) => {
            let Some(reply) = pending.lock().remove(&id) else {
                trace!(id, "Response for a request nobody waits for");
                return;
            };
            let _ = match message.error {
                Some(error) => reply.send(Reply::Error(error)),
                None => reply.send(Reply::Result(message.result.unwrap_or(Value::Null))),
            };
        }
        None => {
            trace!(
                method = message.method.as_deref().unwrap_or_default(),
                session = message.session_id.as_deref().unwrap_or_default(),
                "CDP event"
            );
        }
    }
}

/// A flattened session attached to one target
#[derive(Clone)]
pub struct CdpSession {
    conn: Arc<CdpConnection>,
    session_id: String,
}

impl CdpSession {
    pub fn new(conn: Arc<CdpConnection>, session_id: String) -> Self {
        Self { conn, session_id }
    }

    pub async fn call(&self, method: &str, params: Value) -> CdpResult<Value> {
        self.conn.send(method, params, Some(&self.session_id)).await
    }
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Resolves the browser WebSocket URL from an `http://host:port` endpoint
pub async fn discover(client: &reqwest::Client, endpoint: &str) -> CdpResult<String> {
    let url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    let version: VersionInfo = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(version.web_socket_debugger_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::testing::FakeBrowser;
    use serde_json::json;
    use std::time::Duration;

    async fn connect(browser: &FakeBrowser) -> CdpConnection {
        let ws_url = discover(&reqwest::Client::new(), &browser.endpoint)
            .await
            .unwrap();
        CdpConnection::connect(&ws_url).await.unwrap()
    }

    #[tokio::test]
    async fn test_discover_and_correlate() {
        let browser = FakeBrowser::spawn().await;
        let conn = connect(&browser).await;

        let (a, b) = tokio::join!(
            conn.send("Target.createBrowserContext", json!({}), None),
            conn.send("Target.createTarget", json!({"url": "about:blank"}), None),
        );
        assert_eq!(a.unwrap()["browserContextId"], "context-1");
        assert_eq!(b.unwrap()["targetId"], "target-1");
    }

    #[tokio::test]
    async fn test_protocol_error_names_method() {
        let browser = FakeBrowser::spawn().await;
        let conn = connect(&browser).await;

        let err = conn
            .send("Bogus.method", json!({}), None)
            .await
            .unwrap_err();
        match err {
            CdpError::Protocol { method, code, .. } => {
                assert_eq!(method, "Bogus.method");
                assert_eq!(code, -32601);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_request_is_forgotten() {
        let browser = FakeBrowser::spawn().await;
        let conn = connect(&browser).await;

        let slow = conn.send("Test.hang", json!({}), None);
        let _ = tokio::time::timeout(Duration::from_millis(50), slow).await;
        assert!(conn.pending.lock().is_empty());

        // The connection stays usable
        let ok = conn.send("Target.createBrowserContext", json!({}), None).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_pending_requests_fail_when_socket_closes() {
        let browser = FakeBrowser::spawn().await;
        let conn = connect(&browser).await;

        let err = conn.send("Test.close", json!({}), None).await.unwrap_err();
        assert!(err.is_connection_lost());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(conn.is_closed());
        let err = conn.send("Target.createBrowserContext", json!({}), None).await;
        assert!(matches!(err, Err(CdpError::Closed)));
    }

    #[tokio::test]
    async fn test_discover_unreachable_endpoint() {
        let err = discover(&reqwest::Client::new(), "http://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, CdpError::Discovery(_)));
    }
}
