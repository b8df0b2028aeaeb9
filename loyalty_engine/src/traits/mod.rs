//! # Storage contracts
//!
//! The traits in this module define what a storage backend must provide to the engine. The engine itself never
//! talks to a database directly.
//!
//! * [`AccrualManagement`] is the contract the accrual reconciliation loop relies on: finding orders that are still
//!   waiting for an accrual decision, and atomically applying an accrual result (the balance update transaction).
//! * [`AccountManagement`] covers users, order uploads, balances and withdrawals.
//!
//! Both traits return futures that are `Send`, so implementations can be driven from spawned tasks.
mod accrual_management;
mod account_management;
mod data_objects;
mod errors;

pub use accrual_management::AccrualManagement;
pub use account_management::AccountManagement;
pub use data_objects::{AccrualUpdate, InsertOrderResult};
pub use errors::StorageError;
