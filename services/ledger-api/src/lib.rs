//! HTTP front end for the ledger
//!
//! Routes JSON requests to [`ledger_core::Ledger`] and maps its error kinds
//! to status codes.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;

pub use config::Config;
pub use errors::{ApiError, Result};
