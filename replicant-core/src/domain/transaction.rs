//! Transaction domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::domain::error::TransactionError;

/// Transaction definition
///
/// Structure shared between the store (persists), the HTTP layer (accepts)
/// and the executor (runs). Read-only for the duration of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Unique name within a store, used as the de-duplication key
    pub name: String,
    /// Driver selector (`script`, `automation`)
    pub driver: String,
    /// Cron-style expression, only meaningful to an external scheduler
    #[serde(skip_serializing_if = "String::is_empty")]
    pub schedule: String,
    /// Duration string bounding the whole run, retries included
    pub timeout: String,
    /// Additional attempts after the first failure
    pub retry_count: u32,
    /// Values interpolated into the script or steps before compilation
    pub inputs: HashMap<String, JsonValue>,
    /// Opaque labels copied into every result
    pub metadata: HashMap<String, String>,
    /// Script driver payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Automation driver payload
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

/// One declarative browser step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
}

impl Step {
    /// Human-readable label used in failure messages
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.action.kind())
    }
}

/// Browser step actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    WaitVisible {
        selector: String,
    },
    Sleep {
        duration: String,
    },
    Extract {
        selector: String,
        into: String,
    },
    Evaluate {
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        into: Option<String>,
    },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Navigate { .. } => "navigate",
            StepAction::Click { .. } => "click",
            StepAction::Type { .. } => "type",
            StepAction::WaitVisible { .. } => "wait_visible",
            StepAction::Sleep { .. } => "sleep",
            StepAction::Extract { .. } => "extract",
            StepAction::Evaluate { .. } => "evaluate",
        }
    }
}

/// Result of a transaction run
///
/// `name`, `driver` and `metadata` always come from the submitted config, even
/// when the run never reached a driver, so every result can be correlated back
/// to its request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub name: String,
    pub driver: String,
    /// Run identifier supplied by the caller
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub failed: bool,
    pub error: Option<TransactionError>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl TransactionResult {
    /// Creates a successful, zero-duration result stamped with the current time
    pub fn new(id: &str, config: &TransactionConfig) -> Self {
        Self {
            name: config.name.clone(),
            driver: config.driver.clone(),
            uuid: id.to_string(),
            metadata: config.metadata.clone(),
            time: Utc::now(),
            duration_seconds: 0.0,
            failed: false,
            error: None,
            message: String::new(),
            data: None,
        }
    }

    /// Creates a failed result for a run that never started
    pub fn failed(id: &str, config: &TransactionConfig, error: TransactionError) -> Self {
        Self::new(id, config).with_error(error)
    }

    /// Marks the result as failed with the given error
    pub fn with_error(mut self, error: TransactionError) -> Self {
        self.failed = true;
        self.error = Some(error);
        self
    }

    /// Sets `time` to the start of the run and `duration_seconds` to the elapsed time
    pub fn timed(mut self, started_at: DateTime<Utc>, elapsed: std::time::Duration) -> Self {
        self.time = started_at;
        self.duration_seconds = elapsed.as_secs_f64();
        self
    }
}
