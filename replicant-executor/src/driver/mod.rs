//! Concrete drivers
//!
//! - `script`: Lua transaction scripts run in a capability-scoped sandbox
//! - `automation`: declarative browser steps against the managed renderer

mod automation;
mod script;

pub use automation::AutomationDriver;
pub use script::ScriptDriver;
