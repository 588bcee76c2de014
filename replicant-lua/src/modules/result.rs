//! Result builder module for transaction scripts
//!
//! `replicant.NewResult()` returns a table with mutable `Message`, `Error`,
//! `Failed` and `Data` fields and a `JSON` method. The string produced by
//! `rr:JSON()` is what the script's `Run` function returns to the driver.

use crate::module::HostModule;
use mlua::prelude::*;
use serde_json::{Value as JsonValue, json};

/// Result builder module
pub struct ResultModule;

impl HostModule for ResultModule {
    fn id(&self) -> &'static str {
        "NewResult"
    }

    fn register(&self, lua: &Lua, host: &LuaTable) -> LuaResult<()> {
        let methods = lua.create_table()?;
        methods.set(
            "JSON",
            lua.create_function(|lua, result: LuaTable| result_json(lua, &result))?,
        )?;

        let metatable = lua.create_table()?;
        metatable.set("__index", methods)?;

        host.set(
            self.id(),
            lua.create_function(move |lua, ()| {
                let result = lua.create_table()?;
                result.set("Message", "")?;
                result.set("Error", "")?;
                result.set("Failed", false)?;
                result.set_metatable(Some(metatable.clone()))?;
                Ok(result)
            })?,
        )?;
        Ok(())
    }
}

/// Serializes a result table
fn result_json(lua: &Lua, result: &LuaTable) -> LuaResult<String> {
    let message = result.get::<Option<String>>("Message")?.unwrap_or_default();
    let error = result.get::<Option<String>>("Error")?.unwrap_or_default();
    let failed: bool = result.get("Failed")?;
    let data = match result.get::<LuaValue>("Data")? {
        LuaValue::Nil => JsonValue::Null,
        value => lua.from_value(value)?,
    };

    let body = json!({
        "message": message,
        "error": error,
        "failed": failed,
        "data": data,
    });
    serde_json::to_string(&body).map_err(LuaError::external)
}
