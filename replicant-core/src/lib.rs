//! Replicant Core
//!
//! Core types and abstractions for the Replicant transaction engine.
//!
//! This crate contains:
//! - Domain types: transaction configuration, results and the error taxonomy
//! - Driver abstraction: the `Driver`/`Transaction` traits and the per-run context
//! - Helpers shared by drivers: duration parsing and `{{ }}` input interpolation

pub mod domain;
pub mod driver;
pub mod duration;
pub mod template;

pub use domain::error::TransactionError;
pub use domain::transaction::{Step, StepAction, TransactionConfig, TransactionResult};
pub use driver::{Driver, RunContext, Transaction};
