//! Simple Ledger - transactional transfer engine
//!
//! Accounts, transfers and double-entry ledger lines over PostgreSQL.
//!
//! # Modules
//!
//! - [`ledger`] - Transfer engine, repository seam and stores
//! - [`db`] - PostgreSQL pool and schema
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;

// Convenient re-exports at crate root
pub use config::{AppConfig, DatabaseConfig, LedgerConfig};
pub use db::Database;
pub use ledger::{
    Account, AccountId, Entry, LedgerError, MemoryStore, PgStore, Store, Transfer, TransferEngine,
    TransferResult,
};
