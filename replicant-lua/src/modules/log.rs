//! Logging module for transaction scripts
//!
//! `replicant.Log(value)` is a best-effort, single-argument sink. It never
//! raises: values that cannot be rendered are logged as a placeholder.

use crate::module::HostModule;
use mlua::prelude::*;
use std::sync::Arc;

/// Trait for log sinks
///
/// The executor provides a sink that forwards to `tracing` with the run's
/// identifiers attached; tests provide collecting sinks.
pub trait LogSink: Send + Sync {
    /// Write a log message
    fn write(&self, message: &str);
}

/// Logging module for transaction scripts
pub struct LogModule<S: LogSink> {
    sink: Arc<S>,
}

impl<S: LogSink> LogModule<S> {
    /// Creates a new LogModule with the provided sink
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }
}

impl<S: LogSink + 'static> HostModule for LogModule<S> {
    fn id(&self) -> &'static str {
        "Log"
    }

    fn register(&self, lua: &Lua, host: &LuaTable) -> LuaResult<()> {
        let sink = self.sink.clone();
        host.set(
            self.id(),
            lua.create_function(move |lua, value: LuaValue| {
                sink.write(&render(lua, value));
                Ok(())
            })?,
        )?;
        Ok(())
    }
}

/// Renders any Lua value as log text
///
/// Tables are rendered as JSON when possible, everything else with `tostring`.
fn render(lua: &Lua, value: LuaValue) -> String {
    if let LuaValue::String(s) = &value {
        return s.to_string_lossy().to_string();
    }

    if let LuaValue::Table(_) = &value {
        if let Ok(json) = lua.from_value::<serde_json::Value>(value.clone()) {
            return json.to_string();
        }
    }

    lua.globals()
        .get::<LuaFunction>("tostring")
        .and_then(|tostring| tostring.call::<String>(value))
        .unwrap_or_else(|_| "<unprintable value>".to_string())
}
