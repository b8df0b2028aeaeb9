//! Loyalty Engine
//!
//! Users upload the numbers of their purchase orders, and an external accrual service decides whether each order
//! earns loyalty points. This library contains the core of the loyalty backend.
//!
//! The library is divided into three main sections:
//! 1. Storage ([`mod@db_types`], [`mod@traits`]). The traits define what the engine expects from a storage backend.
//!    SQLite is the supported backend. Balance changes only ever happen inside a storage transaction, and every one
//!    of them is recorded in an append-only ledger.
//! 2. The public API ([`AccrualApi`], [`AccountApi`]). Callers should use these rather than the storage backend
//!    directly.
//! 3. Accrual reconciliation ([`mod@accrual`]). A worker pool polls the accrual service for every unfinished order,
//!    with retries and backoff, and the results are applied to user balances.
mod api;
mod db;

pub mod accrual;
pub mod db_types;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use api::{accounts_api::AccountApi, accrual_api::AccrualApi, errors::AccountApiError};
#[cfg(feature = "sqlite")]
pub use db::sqlite::SqliteDatabase;
pub use traits::{AccountManagement, AccrualManagement, AccrualUpdate, InsertOrderResult, StorageError};
