use mlua::prelude::*;

/// Name of the global table every host module registers into
pub const HOST_TABLE: &str = "replicant";

/// Trait for host modules exposed to transaction scripts.
///
/// Each module adds functions or values to the shared `replicant` table.
/// Nothing else from the host is visible inside the sandbox.
///
/// # Example
///
/// ```rust
/// use replicant_lua::HostModule;
/// use mlua::prelude::*;
///
/// struct VersionModule;
///
/// impl HostModule for VersionModule {
///     fn id(&self) -> &'static str {
///         "Version"
///     }
///
///     fn register(&self, _lua: &Lua, host: &LuaTable) -> LuaResult<()> {
///         host.set(self.id(), "1.0.0")
///     }
/// }
/// ```
pub trait HostModule: Send + Sync {
    /// Returns the unique identifier for this module.
    ///
    /// This is the key the module occupies in the `replicant` table, so a
    /// module with id `"http"` is reachable as `replicant.http`.
    fn id(&self) -> &'static str;

    /// Registers this module's functions and values into the host table.
    ///
    /// # Arguments
    /// * `lua` - The Lua state
    /// * `host` - The `replicant` table to register into
    fn register(&self, lua: &Lua, host: &LuaTable) -> LuaResult<()>;
}

/// Registry for host modules
///
/// Built per run by the script driver, since some modules (HTTP, logging)
/// are bound to the run's context.
pub struct ModuleRegistry {
    modules: Vec<Box<dyn HostModule>>,
}

impl ModuleRegistry {
    /// Creates a new empty module registry
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Registers a module
    ///
    /// # Panics
    /// Panics if a module with the same ID is already registered
    pub fn register<M: HostModule + 'static>(&mut self, module: M) {
        let id = module.id();
        if self.modules.iter().any(|m| m.id() == id) {
            panic!("Module with id '{}' is already registered", id);
        }
        self.modules.push(Box::new(module));
    }

    /// Creates the `replicant` global and registers all modules into it
    ///
    /// # Errors
    /// Returns the first error encountered during registration
    pub fn register_all(&self, lua: &Lua) -> LuaResult<()> {
        let host = lua.create_table()?;
        for module in &self.modules {
            module.register(lua, &host)?;
        }
        lua.globals().set(HOST_TABLE, host)?;
        Ok(())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
