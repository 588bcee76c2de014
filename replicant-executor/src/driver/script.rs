//! Script driver

use async_trait::async_trait;
use chrono::Utc;
use replicant_core::template;
use replicant_core::{
    Driver, RunContext, Transaction, TransactionConfig, TransactionError, TransactionResult,
};
use replicant_lua::{
    CompiledScript, HttpModule, JsonModule, LogModule, LogSink, ModuleRegistry, ResultModule,
    ScriptError, DEFAULT_MEMORY_LIMIT, compile_script_with_memory_limit,
};
use std::time::Instant;
use tracing::{debug, info};

pub const SCRIPT_DRIVER: &str = "script";

/// Runs Lua transaction scripts
///
/// The host HTTP client is shared by every run for connection pooling; each
/// run gets its own sandbox and its own module instances bound to its context.
pub struct ScriptDriver {
    client: reqwest::Client,
    memory_limit: usize,
}

impl ScriptDriver {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    /// Bytes a single script may allocate
    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.memory_limit = memory_limit;
        self
    }
}

impl Driver for ScriptDriver {
    fn name(&self) -> &str {
        SCRIPT_DRIVER
    }

    fn new_transaction(
        &self,
        config: &TransactionConfig,
    ) -> Result<Box<dyn Transaction>, TransactionError> {
        let source = config
            .script
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                TransactionError::Configuration("script driver requires a script".to_string())
            })?;

        let source = template::render(source, &config.inputs)
            .map_err(|e| TransactionError::Configuration(e.to_string()))?;

        let script = compile_script_with_memory_limit(&config.name, &source, self.memory_limit)
            .map_err(|e| match e {
                ScriptError::Compile(msg) => {
                    TransactionError::Configuration(format!("script does not compile: {}", msg))
                }
                other => TransactionError::Infrastructure(other.to_string()),
            })?;

        debug!(transaction = %config.name, "Compiled script");
        Ok(Box::new(ScriptTransaction {
            config: config.clone(),
            script,
            client: self.client.clone(),
        }))
    }
}

struct ScriptTransaction {
    config: TransactionConfig,
    script: CompiledScript,
    client: reqwest::Client,
}

impl ScriptTransaction {
    fn modules(&self, ctx: &RunContext) -> ModuleRegistry {
        let mut modules = ModuleRegistry::new();
        modules.register(HttpModule::new(self.client.clone(), ctx.clone()));
        modules.register(LogModule::new(TracingLogSink {
            transaction: ctx.name().to_string(),
            run: ctx.id().to_string(),
        }));
        modules.register(ResultModule);
        modules.register(JsonModule);
        modules
    }
}

#[async_trait]
impl Transaction for ScriptTransaction {
    async fn run(&self, ctx: &RunContext) -> TransactionResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut result = TransactionResult::new(ctx.id(), &self.config);

        match self.script.run(&self.modules(ctx), ctx).await {
            Ok(outcome) => {
                result.message = outcome.message;
                result.data = outcome.data;
                if outcome.failed {
                    let reason = if outcome.error.is_empty() {
                        "script reported failure".to_string()
                    } else {
                        outcome.error
                    };
                    result = result.with_error(TransactionError::Execution(reason));
                }
            }
            Err(ScriptError::Interrupted(e)) => result = result.with_error(e),
            Err(e) => result = result.with_error(TransactionError::Execution(e.to_string())),
        }

        result.timed(started_at, start.elapsed())
    }
}

/// Forwards `replicant.Log` to tracing, tagged with the run
struct TracingLogSink {
    transaction: String,
    run: String,
}

impl LogSink for TracingLogSink {
    fn write(&self, message: &str) {
        info!(transaction = %self.transaction, run = %self.run, "{}", message);
    }
}
