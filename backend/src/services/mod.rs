//! Stock engine services: mutation primitives, reservations, posting, hooks

pub mod accounting;
pub mod allocator;
pub mod hooks;
pub mod reservation;
pub mod stock;

pub use accounting::{AccountingService, GlPoster, Posting};
pub use allocator::{Allocation, AllocationTarget, BatchAllocator};
pub use hooks::{HookDispatcher, HookFailure, HookWorker, StockEvent, StockEventKind};
pub use reservation::{ReservationInput, ReservationOutcome, ReservationService};
pub use stock::{
    AddStockInput, AddStockOutcome, AdjustStockInput, AdjustStockOutcome, RemoveStockInput,
    RemoveStockOutcome, StockService, StockSnapshot, TransferOutcome, TransferStockInput,
};
