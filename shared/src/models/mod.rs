//! Domain models and pure calculations for the stock engine

mod batch;
mod ledger;
mod stock;

pub use batch::*;
pub use ledger::*;
pub use stock::*;
