//! Ledger Core
//!
//! Double-entry ledger with idempotent transaction commits and a JSON
//! search DSL, backed by SQLite.
//!
//! # Architecture
//!
//! - **Derived balances**: balances are never stored, only summed from lines
//! - **Idempotent commits**: the transaction ID is the idempotency key
//! - **No global lock**: the ID uniqueness constraint arbitrates concurrent writers
//! - **Parameterized search**: query documents compile to bound SQL
//!
//! # Invariants
//!
//! - Every committed transaction balances: Σ(delta) == 0
//! - A committed `(id, lines)` pair never changes; only `data` may be updated
//! - For one ID exactly one submission is `Created`

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod search;
pub mod storage;
pub mod types;

// Re-exports
pub use config::{Config, DatabaseConfig};
pub use error::{Error, ErrorKind, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use search::{Namespace, SearchEngine, SearchResults, TransactionResult};
pub use storage::Storage;
pub use types::{Account, Data, Timestamp, Transaction, TransactionLine, TransactionOutcome};
