//! Lua sandbox creation
//!
//! This module provides a restricted Lua state for transaction scripts. It
//! prevents access to the filesystem, the process environment, module loading
//! and raw network primitives. The only outside capabilities a script gets are
//! the host modules registered by the caller under the `replicant` table.

use mlua::{HookTriggers, Lua, LuaOptions, Result as LuaResult, StdLib, VmState};
use replicant_core::RunContext;

/// Number of VM instructions between two deadline checks
const INTERRUPT_CHECK_INSTRUCTIONS: u32 = 10_000;

/// Memory a script may allocate unless configured otherwise
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Create a restricted Lua sandbox
///
/// This sandbox includes only table, string, math, utf8 and coroutine
/// libraries, and does NOT include any I/O capabilities or the ability to
/// load external code.
///
/// # Security
/// This sandbox prevents:
/// - File system access (`io`, `dofile`, `loadfile`)
/// - Process and environment access (`os`)
/// - Loading modules or arbitrary chunks (`require`, `package`, `load`)
/// - Introspection that escapes the sandbox (`debug`)
/// - Writing to the host's stdout (`print`); scripts log through `replicant.Log`
/// - Exhausting host memory: allocations beyond `DEFAULT_MEMORY_LIMIT` raise a
///   Lua memory error instead of aborting the process
///
/// # Example
/// ```no_run
/// use replicant_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let sum: i32 = lua.load("return 1 + 2").eval()?;
/// assert_eq!(sum, 3);
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    create_sandbox_with_memory_limit(DEFAULT_MEMORY_LIMIT)
}

/// Same as `create_sandbox` with an explicit allocation limit in bytes
pub fn create_sandbox_with_memory_limit(memory_limit: usize) -> LuaResult<Lua> {
    // Only allow: TABLE, STRING, MATH, UTF8, COROUTINE
    // Explicitly exclude: IO, OS, PACKAGE, DEBUG
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE,
        LuaOptions::default(),
    )?;
    lua.set_memory_limit(memory_limit)?;

    // Remove dangerous globals from the base library
    let globals = lua.globals();
    for name in [
        "require",
        "dofile",
        "loadfile",
        "load",
        "collectgarbage",
        "print",
    ] {
        globals.set(name, mlua::Nil)?;
    }

    Ok(lua)
}

/// Interrupts the running script once the run is cancelled or past its deadline
///
/// Network calls already observe the context; this hook covers CPU-bound
/// scripts that never yield back to the host.
pub fn install_interrupt(lua: &Lua, ctx: RunContext) {
    let triggers = HookTriggers::new().every_nth_instruction(INTERRUPT_CHECK_INSTRUCTIONS);
    let _ = lua.set_hook(triggers, move |_lua, _debug| {
        if ctx.is_done() {
            Err(mlua::Error::RuntimeError(format!(
                "script interrupted: {}",
                ctx.interruption()
            )))
        } else {
            Ok(VmState::Continue)
        }
    });
}
