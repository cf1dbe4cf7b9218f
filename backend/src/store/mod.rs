//! Ledger store: row types and queries over the stock and accounting tables
//!
//! Every function takes the connection of the caller's transaction; nothing
//! here begins or commits on its own. Functions named `lock_*` take row locks
//! (`FOR UPDATE`) that are held until the transaction ends.

pub mod accounts;
pub mod batches;
pub mod journal;
pub mod locations;
pub mod products;
pub mod serials;
pub mod warehouses;

pub use accounts::{Account, GlEntry, TrialBalanceRow};
pub use batches::Batch;
pub use journal::{LedgerEntry, Movement, NewLedgerEntry, NewMovement, Transfer};
pub use locations::StockLocation;
pub use products::{NewProduct, Product};
pub use serials::Serial;
pub use warehouses::Warehouse;
