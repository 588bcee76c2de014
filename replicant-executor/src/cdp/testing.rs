//! In-process stand-in for a headless renderer's debugging endpoint

use axum::{Json, Router, routing::get};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Recorded `(method, params)` pairs, in arrival order
type Calls = Arc<Mutex<Vec<(String, Value)>>>;

/// Fake browser answering the subset of the protocol the automation driver uses
///
/// Selectors containing `#missing` match nothing. `Page.navigate` to a URL
/// containing `/slow` never answers, nor does disposing a context whose id
/// contains `stuck`. `Test.hang` never answers, `Test.close` closes the socket.
pub struct FakeBrowser {
    /// `http://host:port` debugging endpoint
    pub endpoint: String,
    calls: Calls,
}

impl FakeBrowser {
    pub async fn spawn() -> Self {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));

        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = ws_listener.local_addr().unwrap();
        {
            let calls = calls.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = ws_listener.accept().await {
                    let calls = calls.clone();
                    tokio::spawn(async move {
                        if let Ok(socket) = accept_async(stream).await {
                            serve_socket(socket, calls).await;
                        }
                    });
                }
            });
        }

        let ws_url = format!("ws://{}/devtools/browser/fake", ws_addr);
        let app = Router::new().route(
            "/json/version",
            get(move || {
                let ws_url = ws_url.clone();
                async move {
                    Json(json!({
                        "Browser": "FakeChrome/1.0",
                        "webSocketDebuggerUrl": ws_url,
                    }))
                }
            }),
        );
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_addr = http_listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(http_listener, app).await.unwrap();
        });

        Self {
            endpoint: format!("http://{}", http_addr),
            calls,
        }
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Params of the last call to `method`
    pub fn params(&self, method: &str) -> Option<Value> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
    }
}

async fn serve_socket<S>(socket: tokio_tungstenite::WebSocketStream<S>, calls: Calls)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut source) = socket.split();

    while let Some(Ok(frame)) = source.next().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };

        let id = request["id"].clone();
        let method = request["method"].as_str().unwrap_or_default().to_string();
        let params = request["params"].clone();
        calls.lock().push((method.clone(), params.clone()));

        match method.as_str() {
            "Test.close" => {
                let _ = sink.close().await;
                return;
            }
            "Test.hang" => continue,
            "Page.navigate" if params["url"].as_str().unwrap_or_default().contains("/slow") => {
                continue;
            }
            "Target.disposeBrowserContext"
                if params["browserContextId"]
                    .as_str()
                    .unwrap_or_default()
                    .contains("stuck") =>
            {
                continue;
            }
            _ => {}
        }

        let mut response = match respond(&method, &params) {
            Ok(result) => json!({"id": id, "result": result}),
            Err(message) => json!({"id": id, "error": {"code": -32601, "message": message}}),
        };
        if let Some(session) = request.get("sessionId") {
            response["sessionId"] = session.clone();
        }

        // A stray event between responses, as a real browser would send
        let event = json!({"method": "Page.lifecycleEvent", "params": {"name": "load"}});
        let _ = sink.send(Message::Text(event.to_string())).await;
        if sink.send(Message::Text(response.to_string())).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn respond(method: &str, params: &Value) -> Result<Value, String> {
    Ok(match method {
        "Target.createBrowserContext" => json!({"browserContextId": "context-1"}),
        "Target.createTarget" => json!({"targetId": "target-1"}),
        "Target.attachToTarget" => json!({"sessionId": "session-1"}),
        "Target.disposeBrowserContext" | "Page.enable" | "Runtime.enable" | "Input.insertText" => {
            json!({})
        }
        "Page.navigate" => {
            if params["url"].as_str().unwrap_or_default().contains("unreachable") {
                json!({"frameId": "frame-1", "errorText": "net::ERR_NAME_NOT_RESOLVED"})
            } else {
                json!({"frameId": "frame-1"})
            }
        }
        "Runtime.evaluate" => evaluate(params["expression"].as_str().unwrap_or_default()),
        other => return Err(format!("'{}' wasn't found", other)),
    })
}

fn evaluate(expression: &str) -> Value {
    let value = if expression.contains("throw") {
        return json!({
            "result": {"type": "object", "subtype": "error"},
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": {"description": "Error: boom"}
            }
        });
    } else if expression.contains("document.readyState") {
        json!("complete")
    } else if expression.contains("#missing") {
        if expression.contains("textContent") {
            Value::Null
        } else {
            json!(false)
        }
    } else if expression.contains("textContent") {
        json!("Hello, replicant")
    } else if expression.contains("getBoundingClientRect")
        || expression.contains(".click()")
        || expression.contains(".focus()")
    {
        json!(true)
    } else {
        json!(42)
    };

    json!({"result": {"type": "object", "value": value}})
}
