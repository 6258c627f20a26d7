//! Ledger Transfer Engine
//!
//! Moves funds between two accounts as one atomic unit of work.
//!
//! # Architecture
//!
//! ```text
//! caller → TransferEngine → exec_tx → Store::begin → UnitOfWork (Queries)
//!                                                       ↑
//!                                        add_balances_ordered (lock order)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **All-or-nothing**: the transfer row, both entries and both balance
//!    updates commit together or not at all
//! 2. **Balanced entries**: the two entries of a transfer sum to zero
//! 3. **Lock order**: balance rows are always updated lower id first
//! 4. **Server-side deltas**: balances change by `balance + delta` in the store,
//!    never by writing back a value read earlier

pub mod engine;
pub mod error;
pub mod memory;
pub mod ordering;
pub mod postgres;
pub mod repository;
pub mod state;
pub mod tx;
pub mod types;

// Re-exports for convenience
pub use engine::TransferEngine;
pub use error::{ErrorKind, LedgerError};
pub use memory::MemoryStore;
pub use ordering::{BalanceDelta, add_balances_ordered, lock_order};
pub use postgres::PgStore;
pub use repository::{Queries, Store, UnitOfWork};
pub use state::{TransferState, TransferTrace};
pub use tx::exec_tx;
pub use types::{
    Account, AccountId, CreateAccountParams, Entry, EntryId, ListParams, MinorUnits, Transfer,
    TransferId, TransferResult,
};
