//! JSON helpers for transaction scripts
//!
//! `replicant.JSON.parse(text)` and `replicant.JSON.stringify(value)`.
//! JSON `null` decodes to `nil`.

use crate::module::HostModule;
use mlua::prelude::*;
use serde_json::Value as JsonValue;

/// JSON module
pub struct JsonModule;

impl HostModule for JsonModule {
    fn id(&self) -> &'static str {
        "JSON"
    }

    fn register(&self, lua: &Lua, host: &LuaTable) -> LuaResult<()> {
        let json_table = lua.create_table()?;

        json_table.set(
            "parse",
            lua.create_function(|lua, text: String| {
                let value: JsonValue = serde_json::from_str(&text).map_err(|e| {
                    LuaError::RuntimeError(format!("JSON.parse: invalid JSON: {}", e))
                })?;
                let options = LuaSerializeOptions::new()
                    .serialize_none_to_null(false)
                    .serialize_unit_to_null(false);
                lua.to_value_with(&value, options)
            })?,
        )?;

        json_table.set(
            "stringify",
            lua.create_function(|lua, value: LuaValue| {
                let value: JsonValue = lua.from_value(value)?;
                serde_json::to_string(&value).map_err(LuaError::external)
            })?,
        )?;

        host.set(self.id(), json_table)?;
        Ok(())
    }
}
