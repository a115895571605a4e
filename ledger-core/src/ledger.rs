//! Main ledger orchestration layer
//!
//! This module ties together validation, storage and search into the
//! high-level API used by the HTTP service.
//!
//! # Commit protocol
//!
//! 1. Validate the transaction (balanced, well-formed) before any storage access
//! 2. Check whether the ID is already committed
//! 3. If so, compare committed lines with the submitted ones as an unordered
//!    multiset: equal is `Duplicate`, different is `Conflict`
//! 4. Otherwise run the atomic commit unit. Losing the uniqueness race on the
//!    header insert falls back to step 3 against the winner's row
//!
//! No in-process lock is taken; the transaction ID primary key is the only
//! concurrency control.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, Ledger, Transaction, TransactionLine};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(&Config::default()).await?;
//!
//!     let txn = Transaction::new(
//!         "t1",
//!         vec![TransactionLine::new("alice", 100), TransactionLine::new("bob", -100)],
//!     );
//!     let outcome = ledger.make_transaction(txn).await?;
//!     println!("{outcome}");
//!
//!     ledger.close().await;
//!     Ok(())
//! }
//! ```

use crate::{
    metrics::Metrics,
    search::SearchEngine,
    storage::{CommitStatus, Storage},
    types::{same_lines, validate_data_keys, Account, Data, Timestamp, Transaction, TransactionOutcome},
    Config, Error, Result,
};
use std::sync::Arc;
use std::time::Instant;

/// Main ledger interface
#[derive(Debug, Clone)]
pub struct Ledger {
    /// Storage gateway
    storage: Storage,

    /// Metrics (if enabled)
    metrics: Option<Arc<Metrics>>,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(config).await?;

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            "Ledger opened"
        );

        Ok(Self::new(storage))
    }

    /// Wrap an opened storage gateway
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            metrics: None,
        }
    }

    /// Set metrics collector
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Storage gateway
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Metrics collector, if one is attached
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// Submit a transaction
    ///
    /// Returns the outcome; `Duplicate` and `Conflict` are not errors.
    pub async fn make_transaction(&self, txn: Transaction) -> Result<TransactionOutcome> {
        let start = Instant::now();

        if let Err(e) = txn.validate() {
            self.record_outcome("rejected");
            tracing::debug!(transaction_id = %txn.id, error = %e, "Transaction rejected");
            return Err(e);
        }

        let outcome = if self.storage.transaction_exists(&txn.id).await? {
            self.resolve_existing(&txn).await?
        } else {
            self.commit_or_resolve(&txn).await?
        };

        self.record_outcome(outcome.as_str());
        if outcome == TransactionOutcome::Created {
            if let Some(metrics) = &self.metrics {
                metrics.record_commit_duration(start.elapsed().as_secs_f64());
            }
        }

        tracing::info!(
            transaction_id = %txn.id,
            outcome = %outcome,
            lines = txn.lines.len(),
            "Transaction processed"
        );

        Ok(outcome)
    }

    /// Commit, or resolve against the row that won the race for this ID
    async fn commit_or_resolve(&self, txn: &Transaction) -> Result<TransactionOutcome> {
        let timestamp = txn.timestamp.unwrap_or_else(Timestamp::now);

        match self.storage.commit_transaction(txn, timestamp).await {
            Ok(CommitStatus::Committed) => Ok(TransactionOutcome::Created),
            Ok(CommitStatus::AlreadyExists) => {
                tracing::warn!(
                    transaction_id = %txn.id,
                    "Concurrent commit won the race, comparing with committed lines"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_commit_race();
                }
                self.resolve_existing(txn).await
            }
            Err(e) => {
                tracing::error!(transaction_id = %txn.id, error = %e, "Commit rolled back");
                if let Some(metrics) = &self.metrics {
                    metrics.record_commit_failure();
                }
                Err(e)
            }
        }
    }

    async fn resolve_existing(&self, txn: &Transaction) -> Result<TransactionOutcome> {
        let committed = self.storage.transaction_lines(&txn.id).await?;

        if same_lines(&committed, &txn.lines) {
            Ok(TransactionOutcome::Duplicate)
        } else {
            tracing::warn!(
                transaction_id = %txn.id,
                "Transaction ID reused with different lines"
            );
            Ok(TransactionOutcome::Conflict)
        }
    }

    /// Replace a committed transaction's data
    pub async fn update_transaction(&self, id: &str, data: Data) -> Result<()> {
        validate_data_keys(&data)?;

        if self.storage.update_transaction_data(id, &data).await? == 0 {
            return Err(Error::NotFound(format!("Transaction {id} not found")));
        }

        tracing::info!(transaction_id = %id, "Transaction data updated");
        Ok(())
    }

    /// Create an account
    pub async fn create_account(&self, id: &str, data: Data) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("Account id is required".to_string()));
        }
        validate_data_keys(&data)?;

        if self.storage.account_exists(id).await? {
            return Err(Error::Conflict(format!("Account {id} already exists")));
        }

        match self.storage.insert_account(id, &data).await {
            Ok(()) => {}
            Err(Error::Storage(e)) if crate::error::is_unique_violation(&e) => {
                return Err(Error::Conflict(format!("Account {id} already exists")));
            }
            Err(e) => return Err(e),
        }

        tracing::info!(account_id = %id, "Account created");
        Ok(())
    }

    /// Replace an account's data
    pub async fn update_account(&self, id: &str, data: Data) -> Result<()> {
        validate_data_keys(&data)?;

        if self.storage.update_account_data(id, &data).await? == 0 {
            return Err(Error::NotFound(format!("Account {id} not found")));
        }

        tracing::info!(account_id = %id, "Account data updated");
        Ok(())
    }

    /// Account with its current balance
    pub async fn get_account(&self, id: &str) -> Result<Account> {
        self.storage
            .get_account(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Account {id} not found")))
    }

    /// Balance from transactions at or before `on`; zero when none match
    pub async fn get_balance_on_time(&self, account_id: &str, on: Timestamp) -> Result<i64> {
        self.storage.balance_on_time(account_id, on).await
    }

    /// Search engine for `accounts` or `transactions`
    pub fn search(&self, namespace: &str) -> Result<SearchEngine> {
        let engine = SearchEngine::new(self.storage.clone(), namespace)?;
        Ok(match &self.metrics {
            Some(metrics) => engine.with_metrics(metrics.clone()),
            None => engine,
        })
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.storage.close().await;
    }

    fn record_outcome(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_outcome(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::types::TransactionLine;
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_ledger() -> (Ledger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.database = DatabaseConfig::for_path(temp_dir.path().join("ledger.db"));
        let ledger = Ledger::open(&config)
            .await
            .unwrap()
            .with_metrics(Arc::new(Metrics::new().unwrap()));
        (ledger, temp_dir)
    }

    fn txn(id: &str, pairs: &[(&str, i64)]) -> Transaction {
        Transaction::new(
            id,
            pairs
                .iter()
                .map(|(account, delta)| TransactionLine::new(*account, *delta))
                .collect(),
        )
    }

    fn data(value: serde_json::Value) -> Data {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_created_duplicate_conflict() {
        let (ledger, _dir) = create_test_ledger().await;

        let outcome = ledger
            .make_transaction(txn("t1", &[("a", 100), ("b", -100)]))
            .await
            .unwrap();
        assert_eq!(outcome, TransactionOutcome::Created);

        let outcome = ledger
            .make_transaction(txn("t1", &[("b", -100), ("a", 100)]))
            .await
            .unwrap();
        assert_eq!(outcome, TransactionOutcome::Duplicate);

        let outcome = ledger
            .make_transaction(txn("t1", &[("a", 200), ("b", -200)]))
            .await
            .unwrap();
        assert_eq!(outcome, TransactionOutcome::Conflict);

        let metrics = ledger.metrics().unwrap();
        assert_eq!(metrics.transactions_total.with_label_values(&["created"]).get(), 1);
        assert_eq!(metrics.transactions_total.with_label_values(&["duplicate"]).get(), 1);
        assert_eq!(metrics.transactions_total.with_label_values(&["conflict"]).get(), 1);
    }

    #[tokio::test]
    async fn test_unbalanced_never_persisted() {
        let (ledger, _dir) = create_test_ledger().await;

        let err = ledger
            .make_transaction(txn("t1", &[("a", 100), ("b", -99)]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!ledger.storage().transaction_exists("t1").await.unwrap());
        assert!(!ledger.storage().account_exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_lost_race_resolves_against_winner() {
        let (ledger, _dir) = create_test_ledger().await;
        ledger
            .make_transaction(txn("t1", &[("a", 100), ("b", -100)]))
            .await
            .unwrap();

        // Skip the existence check, as a racing writer would
        let same = ledger
            .commit_or_resolve(&txn("t1", &[("b", -100), ("a", 100)]))
            .await
            .unwrap();
        assert_eq!(same, TransactionOutcome::Duplicate);

        let different = ledger
            .commit_or_resolve(&txn("t1", &[("a", 1), ("c", -1)]))
            .await
            .unwrap();
        assert_eq!(different, TransactionOutcome::Conflict);

        // The losing unit rolled back its account inserts
        assert!(!ledger.storage().account_exists("c").await.unwrap());
        assert_eq!(ledger.metrics().unwrap().commit_races.get(), 2);
    }

    #[tokio::test]
    async fn test_caller_timestamp_kept() {
        let (ledger, _dir) = create_test_ledger().await;
        let ts = Timestamp::parse("2018-01-01 10:00:00.250").unwrap();
        ledger
            .make_transaction(txn("t1", &[("a", 5), ("b", -5)]).with_timestamp(ts))
            .await
            .unwrap();

        let cutoff = Timestamp::parse("2018-01-01 10:00:00.249").unwrap();
        assert_eq!(ledger.get_balance_on_time("a", cutoff).await.unwrap(), 0);
        assert_eq!(ledger.get_balance_on_time("a", ts).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_update_transaction() {
        let (ledger, _dir) = create_test_ledger().await;
        ledger
            .make_transaction(txn("t1", &[("a", 5), ("b", -5)]))
            .await
            .unwrap();

        ledger
            .update_transaction("t1", data(json!({"note": "settled"})))
            .await
            .unwrap();

        let err = ledger
            .update_transaction("missing", Data::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = ledger
            .update_transaction("t1", data(json!({"bad key": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_account_lifecycle() {
        let (ledger, _dir) = create_test_ledger().await;

        ledger
            .create_account("acc1", data(json!({"status": "active"})))
            .await
            .unwrap();
        let err = ledger.create_account("acc1", Data::new()).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let account = ledger.get_account("acc1").await.unwrap();
        assert_eq!(account.balance, 0);
        assert_eq!(account.data["status"], "active");

        ledger
            .update_account("acc1", data(json!({"status": "closed"})))
            .await
            .unwrap();
        let account = ledger.get_account("acc1").await.unwrap();
        assert_eq!(account.data["status"], "closed");

        assert!(matches!(
            ledger.update_account("nope", Data::new()).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            ledger.get_account("nope").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            ledger.create_account("acc2", data(json!({"k1": 1}))).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_explicit_account_then_transaction() {
        let (ledger, _dir) = create_test_ledger().await;
        ledger
            .create_account("a", data(json!({"tier": "gold"})))
            .await
            .unwrap();
        ledger
            .make_transaction(txn("t1", &[("a", 7), ("b", -7)]))
            .await
            .unwrap();

        // Implicit materialization leaves existing data alone
        let account = ledger.get_account("a").await.unwrap();
        assert_eq!(account.balance, 7);
        assert_eq!(account.data["tier"], "gold");
    }

    #[tokio::test]
    async fn test_search_namespace() {
        let (ledger, _dir) = create_test_ledger().await;
        assert!(ledger.search("accounts").is_ok());
        assert!(matches!(
            ledger.search("lines"),
            Err(Error::InvalidNamespace(_))
        ));
    }
}
