//! Shared types and calculations for the ERP stock engine
//!
//! This crate holds everything that does not need a database: reference and
//! status enums, unit conversion, cost averaging, batch allocation plans and
//! the double-entry posting rules.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
