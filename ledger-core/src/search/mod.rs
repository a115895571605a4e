//! Structured search over accounts and transactions
//!
//! A JSON query document ([`dsl`]) is validated and compiled into a
//! parameterized SQLite statement ([`compiler`]) and executed by the
//! [`SearchEngine`] bound to one namespace.

pub mod compiler;
pub mod dsl;
pub mod engine;

pub use compiler::{compile, CompiledQuery, SqlArg};
pub use dsl::{Clause, SearchQuery};
pub use engine::{SearchEngine, SearchResults, TransactionResult};

use crate::Error;
use std::fmt;
use std::str::FromStr;

/// Searchable collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Accounts with derived balances
    Accounts,
    /// Transactions with their lines
    Transactions,
}

impl Namespace {
    /// Name used in routes, logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Accounts => "accounts",
            Namespace::Transactions => "transactions",
        }
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accounts" => Ok(Namespace::Accounts),
            "transactions" => Ok(Namespace::Transactions),
            other => Err(Error::InvalidNamespace(other.to_string())),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_parse() {
        assert_eq!("accounts".parse::<Namespace>().unwrap(), Namespace::Accounts);
        assert_eq!(
            "transactions".parse::<Namespace>().unwrap(),
            Namespace::Transactions
        );
        assert!(matches!(
            "lines".parse::<Namespace>(),
            Err(Error::InvalidNamespace(_))
        ));
        assert!("Accounts".parse::<Namespace>().is_err());
    }
}
