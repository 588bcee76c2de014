//! Automation driver
//!
//! Runs declarative browser steps against the shared renderer. Each run
//! leases the current renderer generation, opens its own connection and its
//! own browser context, and gives both back on every exit path.

use async_trait::async_trait;
use chrono::Utc;
use replicant_core::duration::parse_positive_duration;
use replicant_core::template;
use replicant_core::{
    Driver, RunContext, Step, StepAction, Transaction, TransactionConfig, TransactionError,
    TransactionResult,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cdp::{self, CdpConnection, CdpError, IsolatedPage};
use crate::renderer::RendererManager;

pub const AUTOMATION_DRIVER: &str = "automation";

/// Delay between two polls of a page condition
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Drives the managed renderer through the debugging protocol
pub struct AutomationDriver {
    renderer: Arc<RendererManager>,
    client: reqwest::Client,
}

impl AutomationDriver {
    pub fn new(renderer: Arc<RendererManager>, client: reqwest::Client) -> Self {
        Self { renderer, client }
    }
}

impl Driver for AutomationDriver {
    fn name(&self) -> &str {
        AUTOMATION_DRIVER
    }

    fn new_transaction(
        &self,
        config: &TransactionConfig,
    ) -> Result<Box<dyn Transaction>, TransactionError> {
        if config.steps.is_empty() {
            return Err(TransactionError::Configuration(
                "automation driver requires at least one step".to_string(),
            ));
        }

        let steps = config
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                PlannedStep::compile(index + 1, step, config).map_err(|reason| {
                    TransactionError::Configuration(format!(
                        "step {} ({}): {}",
                        index + 1,
                        step.label(),
                        reason
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(AutomationTransaction {
            config: config.clone(),
            steps,
            renderer: self.renderer.clone(),
            client: self.client.clone(),
        }))
    }
}

/// A validated step with its inputs interpolated
#[derive(Debug, Clone)]
struct PlannedStep {
    index: usize,
    label: String,
    action: Action,
}

#[derive(Debug, Clone)]
enum Action {
    Navigate(String),
    Click(String),
    Type { selector: String, text: String },
    WaitVisible(String),
    Sleep(Duration),
    Extract { selector: String, into: String },
    Evaluate { expression: String, into: Option<String> },
}

impl PlannedStep {
    fn compile(index: usize, step: &Step, config: &TransactionConfig) -> Result<Self, String> {
        let render = |field: &str, value: &str| -> Result<String, String> {
            let rendered = template::render(value, &config.inputs).map_err(|e| e.to_string())?;
            if rendered.trim().is_empty() {
                return Err(format!("'{}' must not be empty", field));
            }
            Ok(rendered)
        };

        let action = match &step.action {
            StepAction::Navigate { url } => {
                let url = render("url", url)?;
                if !(url.starts_with("http://")
                    || url.starts_with("https://")
                    || url.starts_with("about:"))
                {
                    return Err(format!("unsupported URL '{}'", url));
                }
                Action::Navigate(url)
            }
            StepAction::Click { selector } => Action::Click(render("selector", selector)?),
            StepAction::Type { selector, text } => Action::Type {
                selector: render("selector", selector)?,
                // Typing an empty string is legitimate
                text: template::render(text, &config.inputs).map_err(|e| e.to_string())?,
            },
            StepAction::WaitVisible { selector } => {
                Action::WaitVisible(render("selector", selector)?)
            }
            StepAction::Sleep { duration } => {
                let duration = render("duration", duration)?;
                Action::Sleep(parse_positive_duration(&duration).map_err(|e| e.to_string())?)
            }
            StepAction::Extract { selector, into } => Action::Extract {
                selector: render("selector", selector)?,
                into: render("into", into)?,
            },
            StepAction::Evaluate { expression, into } => Action::Evaluate {
                expression: render("expression", expression)?,
                into: into
                    .as_deref()
                    .map(|into| render("into", into))
                    .transpose()?,
            },
        };

        Ok(Self {
            index,
            label: step.label().to_string(),
            action,
        })
    }
}

#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Protocol(#[from] CdpError),

    #[error("{0}")]
    Failed(String),
}

impl PlannedStep {
    async fn execute(
        &self,
        page: &IsolatedPage,
        data: &mut Map<String, Value>,
    ) -> Result<(), StepError> {
        debug!(step = self.index, label = %self.label, "Executing step");

        match &self.action {
            Action::Navigate(url) => {
                let navigated = page
                    .session()
                    .call("Page.navigate", json!({"url": url}))
                    .await?;
                if let Some(error) = navigated.get("errorText").and_then(Value::as_str) {
                    if !error.is_empty() {
                        return Err(StepError::Failed(format!(
                            "navigation to {} failed: {}",
                            url, error
                        )));
                    }
                }
                poll_until(page, "document.readyState === 'complete'", |v| {
                    v == &json!(true) || v == &json!("complete")
                })
                .await
            }
            Action::Click(selector) => {
                let clicked = page.evaluate(&click_script(selector)).await?;
                expect_element(clicked, selector)
            }
            Action::Type { selector, text } => {
                let focused = page.evaluate(&focus_script(selector)).await?;
                expect_element(focused, selector)?;
                page.session()
                    .call("Input.insertText", json!({"text": text}))
                    .await?;
                Ok(())
            }
            Action::WaitVisible(selector) => {
                poll_until(page, &visible_script(selector), |v| v == &json!(true)).await
            }
            Action::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(())
            }
            Action::Extract { selector, into } => {
                match page.evaluate(&text_script(selector)).await? {
                    Value::Null => Err(StepError::Failed(format!(
                        "no element matches selector '{}'",
                        selector
                    ))),
                    text => {
                        data.insert(into.clone(), text);
                        Ok(())
                    }
                }
            }
            Action::Evaluate { expression, into } => {
                let value = page.evaluate(expression).await?;
                if let Some(into) = into {
                    data.insert(into.clone(), value);
                }
                Ok(())
            }
        }
    }
}

/// Polls an expression until `done` accepts its value
///
/// Unbounded here; the run's context bounds the whole step sequence.
async fn poll_until(
    page: &IsolatedPage,
    expression: &str,
    done: impl Fn(&Value) -> bool,
) -> Result<(), StepError> {
    loop {
        if done(&page.evaluate(expression).await?) {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn expect_element(found: Value, selector: &str) -> Result<(), StepError> {
    if found == json!(true) {
        Ok(())
    } else {
        Err(StepError::Failed(format!(
            "no element matches selector '{}'",
            selector
        )))
    }
}

fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn click_script(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; \
         el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()",
        js_string(selector)
    )
}

fn focus_script(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; \
         el.focus(); return true; }})()",
        js_string(selector)
    )
}

fn visible_script(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; \
         const r = el.getBoundingClientRect(); const s = window.getComputedStyle(el); \
         return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }})()",
        js_string(selector)
    )
}

fn text_script(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); return el ? el.textContent : null; }})()",
        js_string(selector)
    )
}

fn infrastructure(e: impl std::fmt::Display) -> TransactionError {
    TransactionError::Infrastructure(e.to_string())
}

struct AutomationTransaction {
    config: TransactionConfig,
    steps: Vec<PlannedStep>,
    renderer: Arc<RendererManager>,
    client: reqwest::Client,
}

impl AutomationTransaction {
    async fn execute(&self) -> Result<Map<String, Value>, TransactionError> {
        let lease = self.renderer.acquire().map_err(infrastructure)?;
        debug!(generation = lease.generation(), "Leased renderer");

        let ws_url = cdp::discover(&self.client, lease.endpoint())
            .await
            .map_err(infrastructure)?;
        let conn = Arc::new(
            CdpConnection::connect(&ws_url)
                .await
                .map_err(infrastructure)?,
        );
        let page = IsolatedPage::open(conn)
            .await
            .map_err(infrastructure)?;

        let mut data = Map::new();
        for step in &self.steps {
            if let Err(e) = step.execute(&page, &mut data).await {
                let message = format!("step {} ({}) failed: {}", step.index, step.label, e);
                return Err(match e {
                    StepError::Protocol(e) if e.is_connection_lost() => {
                        TransactionError::Infrastructure(message)
                    }
                    _ => TransactionError::Execution(message),
                });
            }
        }

        if let Err(e) = page.close().await {
            warn!(transaction = %self.config.name, "Failed to dispose browser context: {}", e);
        }
        Ok(data)
    }
}

#[async_trait]
impl Transaction for AutomationTransaction {
    async fn run(&self, ctx: &RunContext) -> TransactionResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut result = TransactionResult::new(ctx.id(), &self.config);

        // Losing the select drops the run future: page, connection and lease
        // are released before the interruption is reported
        let outcome = tokio::select! {
            outcome = self.execute() => outcome,
            _ = ctx.done() => Err(ctx.interruption()),
        };

        match outcome {
            Ok(data) => {
                result.message = format!("completed {} steps", self.steps.len());
                result.data = Some(Value::Object(data));
            }
            Err(e) => result = result.with_error(e),
        }
        result.timed(started_at, start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::testing::FakeBrowser;
    use crate::renderer::testing::FakeLauncher;
    use crate::renderer::RendererSettings;
    use std::collections::HashMap;

    async fn renderer(endpoint: &str) -> Arc<RendererManager> {
        let manager = Arc::new(RendererManager::new(
            Arc::new(FakeLauncher::with_endpoint(endpoint)),
            RendererSettings::default(),
        ));
        manager.start().await.unwrap();
        manager
    }

    fn step(value: Value) -> Step {
        serde_json::from_value(value).unwrap()
    }

    fn config(steps: Vec<Step>) -> TransactionConfig {
        TransactionConfig {
            name: "login-flow".to_string(),
            driver: AUTOMATION_DRIVER.to_string(),
            timeout: "10s".to_string(),
            inputs: HashMap::from([
                ("base".to_string(), json!("https://shop.example.com")),
                ("user".to_string(), json!("rachael")),
            ]),
            metadata: HashMap::from([("application".to_string(), "shop".to_string())]),
            steps,
            ..Default::default()
        }
    }

    fn full_flow() -> Vec<Step> {
        vec![
            step(json!({"action": "navigate", "url": "{{ base }}/login"})),
            step(json!({"action": "type", "selector": "#user", "text": "{{ user }}"})),
            step(json!({"name": "submit", "action": "click", "selector": "button[type=submit]"})),
            step(json!({"action": "wait_visible", "selector": "h1"})),
            step(json!({"action": "extract", "selector": "h1", "into": "title"})),
            step(json!({"action": "evaluate", "expression": "6 * 7", "into": "answer"})),
        ]
    }

    #[tokio::test]
    async fn test_construction_validates_steps() {
        let manager = renderer("http://127.0.0.1:9").await;
        let driver = AutomationDriver::new(manager, reqwest::Client::new());

        let cases = vec![
            vec![],
            vec![step(json!({"action": "navigate", "url": "ftp://example.com"}))],
            vec![step(json!({"action": "navigate", "url": "{{ nowhere }}"}))],
            vec![step(json!({"action": "click", "selector": "  "}))],
            vec![step(json!({"action": "sleep", "duration": "soon"}))],
            vec![step(json!({"action": "extract", "selector": "h1", "into": ""}))],
        ];

        for steps in cases {
            let err = driver.new_transaction(&config(steps)).err().unwrap();
            assert!(matches!(err, TransactionError::Configuration(_)), "{:?}", err);
        }
    }

    #[tokio::test]
    async fn test_step_sequence() {
        let browser = FakeBrowser::spawn().await;
        let manager = renderer(&browser.endpoint).await;
        let driver = AutomationDriver::new(manager.clone(), reqwest::Client::new());

        let config = config(full_flow());
        let txn = driver.new_transaction(&config).unwrap();
        let ctx = RunContext::with_timeout("run-1", &config.name, Duration::from_secs(5));
        let result = txn.run(&ctx).await;

        assert!(!result.failed, "{:?}", result.error);
        assert_eq!(result.message, "completed 6 steps");
        assert_eq!(
            result.data,
            Some(json!({"title": "Hello, replicant", "answer": 42}))
        );
        assert_eq!(result.metadata, config.metadata);

        assert_eq!(
            browser.params("Page.navigate").unwrap()["url"],
            "https://shop.example.com/login"
        );
        assert_eq!(browser.params("Input.insertText").unwrap()["text"], "rachael");
        assert!(browser.methods().contains(&"Target.disposeBrowserContext".to_string()));
        assert_eq!(manager.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_first_failure_stops_sequence() {
        let browser = FakeBrowser::spawn().await;
        let manager = renderer(&browser.endpoint).await;
        let driver = AutomationDriver::new(manager, reqwest::Client::new());

        let config = config(vec![
            step(json!({"action": "navigate", "url": "https://shop.example.com"})),
            step(json!({"name": "open cart", "action": "click", "selector": "#missing"})),
            step(json!({"action": "evaluate", "expression": "never()"})),
        ]);
        let txn = driver.new_transaction(&config).unwrap();
        let ctx = RunContext::with_timeout("run-2", &config.name, Duration::from_secs(5));
        let result = txn.run(&ctx).await;

        match result.error {
            Some(TransactionError::Execution(msg)) => {
                assert!(msg.contains("step 2 (open cart)"), "{}", msg);
                assert!(msg.contains("#missing"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let evaluations = browser
            .methods()
            .iter()
            .filter(|m| *m == "Runtime.evaluate")
            .count();
        // readyState poll plus the failed click, nothing after it
        assert_eq!(evaluations, 2);
    }

    #[tokio::test]
    async fn test_navigation_error() {
        let browser = FakeBrowser::spawn().await;
        let manager = renderer(&browser.endpoint).await;
        let driver = AutomationDriver::new(manager, reqwest::Client::new());

        let config = config(vec![step(
            json!({"action": "navigate", "url": "https://unreachable.example"}),
        )]);
        let txn = driver.new_transaction(&config).unwrap();
        let ctx = RunContext::with_timeout("run-3", &config.name, Duration::from_secs(5));
        let result = txn.run(&ctx).await;

        let message = result.error.unwrap().message().to_string();
        assert!(message.contains("step 1 (navigate)"));
        assert!(message.contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[tokio::test]
    async fn test_timeout_releases_lease_and_context() {
        let browser = FakeBrowser::spawn().await;
        let manager = renderer(&browser.endpoint).await;
        let driver = AutomationDriver::new(manager.clone(), reqwest::Client::new());

        let config = config(vec![step(
            json!({"action": "navigate", "url": "https://shop.example.com/slow"}),
        )]);
        let txn = driver.new_transaction(&config).unwrap();
        let ctx = RunContext::with_timeout("run-4", &config.name, Duration::from_millis(200));

        let started = Instant::now();
        let result = txn.run(&ctx).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(result.error, Some(TransactionError::Timeout(_))));
        assert_eq!(manager.in_flight(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(browser.methods().contains(&"Target.disposeBrowserContext".to_string()));
    }

    #[tokio::test]
    async fn test_unavailable_renderer_is_infrastructure_error() {
        let manager = Arc::new(RendererManager::new(
            Arc::new(FakeLauncher::new()),
            RendererSettings::default(),
        ));
        let driver = AutomationDriver::new(manager, reqwest::Client::new());

        let config = config(full_flow());
        let txn = driver.new_transaction(&config).unwrap();
        let ctx = RunContext::with_timeout("run-5", &config.name, Duration::from_secs(5));
        let result = txn.run(&ctx).await;

        assert!(matches!(
            result.error,
            Some(TransactionError::Infrastructure(_))
        ));
    }

    #[tokio::test]
    async fn test_recycle_mid_run_does_not_fail_run() {
        let browser = FakeBrowser::spawn().await;
        let manager = renderer(&browser.endpoint).await;
        let driver = AutomationDriver::new(manager.clone(), reqwest::Client::new());

        let mut steps = full_flow();
        steps.insert(1, step(json!({"action": "sleep", "duration": "300ms"})));
        let config = config(steps);
        let txn = driver.new_transaction(&config).unwrap();
        let ctx = RunContext::with_timeout("run-6", &config.name, Duration::from_secs(5));

        let run = tokio::spawn(async move { txn.run(&ctx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let recycling = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.recycle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.generation(), Some(2));
        assert!(manager.acquire().is_ok());

        let result = run.await.unwrap();
        assert!(!result.failed, "{:?}", result.error);
        assert_eq!(recycling.await.unwrap().unwrap(), 2);
    }
}
