//! HTTP module for transaction scripts
//!
//! Provides `replicant.http.NewRequest()` and `replicant.http.Do(req)`.
//! `Do` is asynchronous on the host side and bound to the run's context: it is
//! aborted when the run is cancelled or reaches its deadline. Non-2xx responses
//! are returned to the script as ordinary responses; deciding whether they
//! mean failure is the script's job.

use crate::module::HostModule;
use mlua::prelude::*;
use replicant_core::RunContext;
use thiserror::Error;
use tracing::debug;

/// HTTP module bound to one run
pub struct HttpModule {
    client: reqwest::Client,
    ctx: RunContext,
}

impl HttpModule {
    /// Creates a new HTTP module
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client (connection pool)
    /// * `ctx` - Context of the run the module is bound to
    pub fn new(client: reqwest::Client, ctx: RunContext) -> Self {
        Self { client, ctx }
    }
}

impl HostModule for HttpModule {
    fn id(&self) -> &'static str {
        "http"
    }

    fn register(&self, lua: &Lua, host: &LuaTable) -> LuaResult<()> {
        let http_table = lua.create_table()?;

        // http.NewRequest()
        http_table.set(
            "NewRequest",
            lua.create_function(|lua, ()| {
                let request = lua.create_table()?;
                request.set("Method", "GET")?;
                request.set("URL", "")?;
                request.set("Params", lua.create_table()?)?;
                request.set("Header", lua.create_table()?)?;
                request.set("Body", "")?;
                Ok(request)
            })?,
        )?;

        // http.Do(req)
        {
            let client = self.client.clone();
            let ctx = self.ctx.clone();
            http_table.set(
                "Do",
                lua.create_async_function(move |lua, request: LuaTable| {
                    let client = client.clone();
                    let ctx = ctx.clone();
                    async move {
                        let request = HttpRequest::from_table(&request)?;
                        let response = request
                            .send(&client, &ctx)
                            .await
                            .map_err(LuaError::external)?;
                        response.into_table(&lua)
                    }
                })?,
            )?;
        }

        host.set(self.id(), http_table)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("request URL is empty")]
    EmptyUrl,

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP request interrupted: {0}")]
    Interrupted(replicant_core::TransactionError),
}

/// Request fields read from the script's request table
#[derive(Debug, Clone, Default)]
struct HttpRequest {
    method: String,
    url: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: String,
}

impl HttpRequest {
    fn from_table(table: &LuaTable) -> LuaResult<Self> {
        let method = table
            .get::<Option<String>>("Method")?
            .unwrap_or_else(|| "GET".to_string());
        let url = table.get::<Option<String>>("URL")?.unwrap_or_default();
        let body = table.get::<Option<String>>("Body")?.unwrap_or_default();

        Ok(Self {
            method,
            url,
            params: string_pairs(table, "Params")?,
            headers: string_pairs(table, "Header")?,
            body,
        })
    }

    async fn send(self, client: &reqwest::Client, ctx: &RunContext) -> Result<HttpResponse, HttpError> {
        if ctx.is_done() {
            return Err(HttpError::Interrupted(ctx.interruption()));
        }
        if self.url.is_empty() {
            return Err(HttpError::EmptyUrl);
        }

        let method = reqwest::Method::from_bytes(self.method.to_uppercase().as_bytes())
            .map_err(|_| HttpError::InvalidMethod(self.method.clone()))?;

        debug!(run = ctx.id(), "HTTP {} {}", method, self.url);

        let mut builder = client
            .request(method, &self.url)
            .timeout(ctx.remaining());
        if !self.params.is_empty() {
            builder = builder.query(&self.params);
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !self.body.is_empty() {
            builder = builder.body(self.body);
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).to_string(),
                    )
                })
                .collect::<Vec<_>>();
            let body = response.text().await?;
            Ok::<_, HttpError>(HttpResponse {
                status,
                headers,
                body,
            })
        };

        tokio::select! {
            response = exchange => response,
            _ = ctx.done() => Err(HttpError::Interrupted(ctx.interruption())),
        }
    }
}

/// Response handed back to the script
#[derive(Debug)]
struct HttpResponse {
    status: reqwest::StatusCode,
    headers: Vec<(String, String)>,
    body: String,
}

impl HttpResponse {
    fn into_table(self, lua: &Lua) -> LuaResult<LuaTable> {
        let table = lua.create_table()?;
        table.set("Status", status_text(self.status))?;
        table.set("StatusCode", self.status.as_u16())?;

        let header = lua.create_table()?;
        for (name, value) in self.headers {
            // Repeated headers are joined like a single comma-separated field
            let joined = match header.get::<Option<String>>(name.as_str())? {
                Some(existing) => format!("{}, {}", existing, value),
                None => value,
            };
            header.set(name, joined)?;
        }
        table.set("Header", header)?;
        table.set("Body", self.body)?;
        Ok(table)
    }
}

/// Status line text such as `"200 OK"`
fn status_text(status: reqwest::StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

/// Reads a string-keyed table field as name/value pairs, sorted by name
fn string_pairs(table: &LuaTable, field: &str) -> LuaResult<Vec<(String, String)>> {
    let Some(inner) = table.get::<Option<LuaTable>>(field)? else {
        return Ok(Vec::new());
    };

    let mut pairs = Vec::new();
    for pair in inner.pairs::<String, String>() {
        pairs.push(pair?);
    }
    pairs.sort();
    Ok(pairs)
}
