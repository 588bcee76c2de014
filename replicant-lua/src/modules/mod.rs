//! Host modules exposed to transaction scripts
//!
//! These are the only capabilities a script has beyond pure Lua: an HTTP
//! client bound to the run's cancellation signal, a log sink, a result builder
//! and JSON helpers.

pub mod http;
pub mod json;
pub mod log;
pub mod result;

pub use http::HttpModule;
pub use json::JsonModule;
pub use log::{LogModule, LogSink};
pub use result::ResultModule;
