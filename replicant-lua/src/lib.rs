//! Replicant Lua Infrastructure
//!
//! Sandboxed script execution for the script driver. It includes:
//! - Host module trait and registry; every module is exposed under the single
//!   `replicant` global table
//! - Restricted sandbox creation with deadline interruption
//! - Host modules: `Log`, `http`, `NewResult`, `JSON`
//! - Script compilation and result parsing

pub mod module;
pub mod modules;
pub mod sandbox;
pub mod script;

pub use module::{HOST_TABLE, HostModule, ModuleRegistry};
pub use modules::{HttpModule, JsonModule, LogModule, LogSink, ResultModule};
pub use sandbox::{
    DEFAULT_MEMORY_LIMIT, create_sandbox, create_sandbox_with_memory_limit, install_interrupt,
};
pub use script::{
    CompiledScript, ScriptError, ScriptOutcome, compile_script, compile_script_with_memory_limit,
};
