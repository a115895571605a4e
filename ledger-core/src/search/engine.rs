//! Search execution

use super::compiler::{compile, SqlArg};
use super::dsl::SearchQuery;
use super::Namespace;
use crate::metrics::Metrics;
use crate::storage::{parse_data, Storage};
use crate::types::{Account, Data, Timestamp, TransactionLine};
use crate::{Error, Result};
use futures_util::TryStreamExt;
use serde::Serialize;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::query::QueryAs;
use std::sync::Arc;

/// Transaction as returned by search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionResult {
    /// Transaction ID
    pub id: String,
    /// Commit timestamp
    pub timestamp: Timestamp,
    /// Metadata
    pub data: Data,
    /// Lines in submission order
    pub lines: Vec<TransactionLine>,
}

/// Search hits, serialized as a plain JSON array
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchResults {
    /// Hits from the `accounts` namespace
    Accounts(Vec<Account>),
    /// Hits from the `transactions` namespace
    Transactions(Vec<TransactionResult>),
}

impl SearchResults {
    /// Number of hits
    pub fn len(&self) -> usize {
        match self {
            SearchResults::Accounts(accounts) => accounts.len(),
            SearchResults::Transactions(transactions) => transactions.len(),
        }
    }

    /// Whether nothing matched
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountHit {
    id: String,
    balance: i64,
    data: String,
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionHit {
    id: String,
    timestamp: String,
    data: Option<String>,
    account_array: String,
    delta_array: String,
}

impl TransactionHit {
    fn into_result(self) -> Result<TransactionResult> {
        let accounts: Vec<String> = serde_json::from_str(&self.account_array)?;
        let deltas: Vec<i64> = serde_json::from_str(&self.delta_array)?;
        if accounts.len() != deltas.len() {
            return Err(Error::Internal(format!(
                "Transaction {} has {} line accounts but {} deltas",
                self.id,
                accounts.len(),
                deltas.len()
            )));
        }

        let timestamp = Timestamp::parse(&self.timestamp).map_err(|_| {
            Error::Internal(format!(
                "Transaction {} has unreadable timestamp {:?}",
                self.id, self.timestamp
            ))
        })?;

        Ok(TransactionResult {
            data: parse_data(self.data.as_deref())?,
            lines: accounts
                .into_iter()
                .zip(deltas)
                .map(|(account, delta)| TransactionLine::new(account, delta))
                .collect(),
            id: self.id,
            timestamp,
        })
    }
}

fn bind_all<'q, O>(
    mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    args: &'q [SqlArg],
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlArg::Text(text) => query.bind(text.as_str()),
            SqlArg::Integer(value) => query.bind(*value),
            SqlArg::Real(value) => query.bind(*value),
        };
    }
    query
}

/// Read-only query executor bound to one namespace
#[derive(Debug, Clone)]
pub struct SearchEngine {
    storage: Storage,
    namespace: Namespace,
    metrics: Option<Arc<Metrics>>,
}

impl SearchEngine {
    /// Create an engine; unknown namespaces fail with `InvalidNamespace`
    pub fn new(storage: Storage, namespace: &str) -> Result<Self> {
        Ok(Self {
            storage,
            namespace: namespace.parse()?,
            metrics: None,
        })
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Bound namespace
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Parse, compile and run a raw query document
    pub async fn query(&self, raw: &str) -> Result<SearchResults> {
        let result = self.run(raw).await;

        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(_) => metrics.record_search(self.namespace.as_str()),
                Err(_) => metrics.record_search_error(self.namespace.as_str()),
            }
        }
        if let Err(e) = &result {
            if e.kind().is_client_error() {
                tracing::debug!(namespace = %self.namespace, error = %e, "Search query rejected");
            } else {
                tracing::error!(namespace = %self.namespace, error = %e, "Search query failed");
            }
        }

        result
    }

    async fn run(&self, raw: &str) -> Result<SearchResults> {
        let query = SearchQuery::parse(raw)?;
        let compiled = compile(&query, self.namespace)?;

        tracing::debug!(
            namespace = %self.namespace,
            sql = %compiled.sql,
            args = compiled.args.len(),
            "Compiled search query"
        );

        let pool = self.storage.pool();
        match self.namespace {
            Namespace::Accounts => {
                let query = bind_all(sqlx::query_as::<_, AccountHit>(&compiled.sql), &compiled.args);
                let mut rows = query.fetch(pool);
                let mut accounts = Vec::new();
                while let Some(hit) = rows.try_next().await? {
                    accounts.push(Account {
                        data: parse_data(Some(&hit.data))?,
                        id: hit.id,
                        balance: hit.balance,
                    });
                }
                Ok(SearchResults::Accounts(accounts))
            }
            Namespace::Transactions => {
                let query = bind_all(
                    sqlx::query_as::<_, TransactionHit>(&compiled.sql),
                    &compiled.args,
                );
                let mut rows = query.fetch(pool);
                let mut transactions = Vec::new();
                while let Some(hit) = rows.try_next().await? {
                    transactions.push(hit.into_result()?);
                }
                Ok(SearchResults::Transactions(transactions))
            }
        }
    }
}
