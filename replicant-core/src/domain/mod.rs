//! Core domain types
//!
//! These types are shared by every driver, the executor, the store and the
//! HTTP layer. A `TransactionConfig` goes in, a `TransactionResult` comes out.

pub mod error;
pub mod transaction;
