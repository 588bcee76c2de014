//! Transaction script compilation and execution
//!
//! A script is compiled once per transaction, in a fresh sandbox, without
//! running any of its code. Running it registers the host modules, executes
//! the chunk so it can define the `Run` entry function, then calls `Run(ctx)`
//! and parses the returned result JSON.

use mlua::prelude::*;
use replicant_core::RunContext;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::module::ModuleRegistry;
use crate::sandbox::{DEFAULT_MEMORY_LIMIT, create_sandbox_with_memory_limit, install_interrupt};

/// Name of the function every script must define
pub const ENTRY_FUNCTION: &str = "Run";

#[derive(Debug, Error)]
pub enum ScriptError {
    /// The source does not compile
    #[error("script does not compile: {0}")]
    Compile(String),

    /// The sandbox could not be prepared
    #[error("failed to prepare script sandbox: {0}")]
    Sandbox(String),

    /// The script raised an uncaught error
    #[error("script error: {0}")]
    Runtime(String),

    /// The script was stopped because the run was cancelled or timed out
    #[error("script interrupted: {0}")]
    Interrupted(replicant_core::TransactionError),

    /// The script returned something other than a result object
    #[error("invalid script result: {0}")]
    InvalidResult(String),
}

/// Outcome reported by the script through its result builder
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScriptOutcome {
    #[serde(default, alias = "Message")]
    pub message: String,
    #[serde(default, alias = "Error")]
    pub error: String,
    #[serde(default, alias = "Failed")]
    pub failed: bool,
    #[serde(default, alias = "Data")]
    pub data: Option<JsonValue>,
}

impl ScriptOutcome {
    /// Parses the JSON text returned by `Run`
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        let value: JsonValue = serde_json::from_str(text)
            .map_err(|e| ScriptError::InvalidResult(format!("not valid JSON: {}", e)))?;
        if !value.is_object() {
            return Err(ScriptError::InvalidResult(format!(
                "expected a JSON object, got {}",
                value
            )));
        }

        let mut outcome: ScriptOutcome = serde_json::from_value(value)
            .map_err(|e| ScriptError::InvalidResult(e.to_string()))?;
        if outcome.data.as_ref().is_some_and(JsonValue::is_null) {
            outcome.data = None;
        }
        Ok(outcome)
    }
}

/// A compiled script bound to its own sandbox
pub struct CompiledScript {
    lua: Lua,
    chunk: LuaFunction,
}

/// Compiles a script in a fresh sandbox
///
/// Syntax errors are reported here, before any host module exists, so a
/// malformed script never reaches the network.
pub fn compile_script(name: &str, source: &str) -> Result<CompiledScript, ScriptError> {
    compile_script_with_memory_limit(name, source, DEFAULT_MEMORY_LIMIT)
}

/// Compiles a script in a sandbox limited to `memory_limit` bytes
pub fn compile_script_with_memory_limit(
    name: &str,
    source: &str,
    memory_limit: usize,
) -> Result<CompiledScript, ScriptError> {
    let lua = create_sandbox_with_memory_limit(memory_limit)
        .map_err(|e| ScriptError::Sandbox(e.to_string()))?;
    let chunk = lua
        .load(source)
        .set_name(name)
        .into_function()
        .map_err(|e| ScriptError::Compile(e.to_string()))?;

    Ok(CompiledScript { lua, chunk })
}

impl CompiledScript {
    /// Runs the script's entry function
    ///
    /// # Arguments
    /// * `modules` - Host modules bound to this run
    /// * `ctx` - Run context; the script is interrupted once it is done
    pub async fn run(
        &self,
        modules: &ModuleRegistry,
        ctx: &RunContext,
    ) -> Result<ScriptOutcome, ScriptError> {
        modules
            .register_all(&self.lua)
            .map_err(|e| ScriptError::Sandbox(e.to_string()))?;
        install_interrupt(&self.lua, ctx.clone());

        let returned = self.call_entry(ctx).await.map_err(|e| {
            if ctx.is_done() {
                ScriptError::Interrupted(ctx.interruption())
            } else {
                ScriptError::Runtime(e.to_string())
            }
        })?;

        match returned {
            LuaValue::String(text) => ScriptOutcome::parse(&text.to_string_lossy().to_string()),
            LuaValue::Nil => Err(ScriptError::InvalidResult(format!(
                "{} returned nothing",
                ENTRY_FUNCTION
            ))),
            other => Err(ScriptError::InvalidResult(format!(
                "{} returned a {}, expected the string from result:JSON()",
                ENTRY_FUNCTION,
                other.type_name()
            ))),
        }
    }

    async fn call_entry(&self, ctx: &RunContext) -> LuaResult<LuaValue> {
        self.chunk.call_async::<()>(()).await?;

        let entry = match self.lua.globals().get::<LuaValue>(ENTRY_FUNCTION)? {
            LuaValue::Function(entry) => entry,
            _ => {
                return Err(LuaError::RuntimeError(format!(
                    "script does not define a {} function",
                    ENTRY_FUNCTION
                )));
            }
        };

        let run_ctx = self.lua.create_table()?;
        run_ctx.set("id", ctx.id())?;
        run_ctx.set("name", ctx.name())?;

        entry.call_async::<LuaValue>(run_ctx).await
    }
}
