//! Storage layer using SQLite
//!
//! # Tables
//!
//! - `accounts` - Account metadata (key: id)
//! - `transactions` - Transaction headers (key: id)
//! - `lines` - One row per transaction line, insertion order kept by `lines.id`
//! - `current_balances` - View deriving every account balance from `lines`

use crate::{
    error::{is_unique_violation, Error, Result},
    types::{Account, Data, Timestamp, Transaction, TransactionLine},
    Config,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Schema statements, executed in order at open
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        id   TEXT PRIMARY KEY NOT NULL,
        data TEXT NOT NULL DEFAULT '{}'
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id        TEXT PRIMARY KEY NOT NULL,
        timestamp TEXT NOT NULL,
        data      TEXT
    )",
    "CREATE TABLE IF NOT EXISTS lines (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        transaction_id TEXT NOT NULL REFERENCES transactions (id),
        account_id     TEXT NOT NULL REFERENCES accounts (id),
        delta          INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS lines_transaction_id_idx ON lines (transaction_id)",
    "CREATE INDEX IF NOT EXISTS lines_account_id_idx ON lines (account_id)",
    "CREATE INDEX IF NOT EXISTS transactions_timestamp_idx ON transactions (timestamp)",
    "CREATE VIEW IF NOT EXISTS current_balances AS
        SELECT accounts.id AS id,
               COALESCE(SUM(lines.delta), 0) AS balance,
               accounts.data AS data
        FROM accounts
        LEFT JOIN lines ON lines.account_id = accounts.id
        GROUP BY accounts.id",
];

/// Result of the atomic commit unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    /// Header and lines persisted
    Committed,
    /// Another writer owns the ID; nothing was written
    AlreadyExists,
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: String,
    balance: i64,
    data: String,
}

impl AccountRow {
    fn into_account(self) -> Result<Account> {
        Ok(Account {
            id: self.id,
            balance: self.balance,
            data: parse_data(Some(&self.data))?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineRow {
    account_id: String,
    delta: i64,
}

/// Decode a stored data blob; `NULL` and `null` become an empty map
pub(crate) fn parse_data(raw: Option<&str>) -> Result<Data> {
    match raw {
        None => Ok(Data::new()),
        Some(raw) => Ok(serde_json::from_str::<Option<Data>>(raw)?.unwrap_or_default()),
    }
}

/// File path named by a `sqlite:` URL, `None` for in-memory databases
fn database_file(url: &str) -> Option<&Path> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let file = rest.split('?').next().unwrap_or(rest);
    if file.is_empty() || file == ":memory:" {
        return None;
    }
    Some(Path::new(file))
}

/// Storage gateway over a SQLite connection pool
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open or create the database and apply the schema
    pub async fn open(config: &Config) -> Result<Self> {
        let db = &config.database;

        let options = SqliteConnectOptions::from_str(&db.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(db.busy_timeout_ms));

        // Create parent directory if not exists
        if let Some(parent) = database_file(&db.url).and_then(|file| file.parent()) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Config(format!("Cannot create database directory {:?}: {}", parent, e))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(db.max_connections)
            .min_connections(db.min_connections)
            .acquire_timeout(Duration::from_secs(db.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        tracing::info!(
            url = %db.url,
            max_connections = db.max_connections,
            "Opened SQLite ledger database"
        );

        Ok(storage)
    }

    /// Create tables, indexes and views if they are missing
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Underlying pool, used by the query engine
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Account operations

    /// Whether an account row exists
    pub async fn account_exists(&self, id: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Insert an account; a duplicate ID surfaces as a storage uniqueness error
    pub async fn insert_account(&self, id: &str, data: &Data) -> Result<()> {
        sqlx::query("INSERT INTO accounts (id, data) VALUES (?, ?)")
            .bind(id)
            .bind(serde_json::to_string(data)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace account data, returning the number of rows touched
    pub async fn update_account_data(&self, id: &str, data: &Data) -> Result<u64> {
        let result = sqlx::query("UPDATE accounts SET data = ? WHERE id = ?")
            .bind(serde_json::to_string(data)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Account with its current derived balance
    pub async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, balance, data FROM current_balances WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AccountRow::into_account).transpose()
    }

    /// Sum of deltas whose parent transaction is at or before `on`
    pub async fn balance_on_time(&self, account_id: &str, on: Timestamp) -> Result<i64> {
        let balance = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(lines.delta), 0)
             FROM lines
             JOIN transactions ON transactions.id = lines.transaction_id
             WHERE lines.account_id = ? AND transactions.timestamp <= ?",
        )
        .bind(account_id)
        .bind(on.to_ledger_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(balance)
    }

    // Transaction operations

    /// Whether a transaction header exists
    pub async fn transaction_exists(&self, id: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM transactions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Committed lines of a transaction, in insertion order
    pub async fn transaction_lines(&self, id: &str) -> Result<Vec<TransactionLine>> {
        let rows = sqlx::query_as::<_, LineRow>(
            "SELECT account_id, delta FROM lines WHERE transaction_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| TransactionLine::new(row.account_id, row.delta))
            .collect())
    }

    /// Replace transaction data, returning the number of rows touched
    pub async fn update_transaction_data(&self, id: &str, data: &Data) -> Result<u64> {
        let result = sqlx::query("UPDATE transactions SET data = ? WHERE id = ?")
            .bind(serde_json::to_string(data)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Atomic commit unit: referenced accounts, header, lines
    ///
    /// The first statement is a write so the unit takes the write lock up
    /// front instead of upgrading a read snapshot. A uniqueness violation on
    /// the header rolls back and reports [`CommitStatus::AlreadyExists`]; any
    /// other failure rolls back and surfaces [`Error::CommitFailed`].
    pub async fn commit_transaction(
        &self,
        txn: &Transaction,
        timestamp: Timestamp,
    ) -> Result<CommitStatus> {
        let id = txn.id.as_str();
        let data = serde_json::to_string(&txn.data)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::commit_failed(id, e))?;

        let mut seen = HashSet::new();
        for line in &txn.lines {
            if !seen.insert(line.account.as_str()) {
                continue;
            }
            sqlx::query("INSERT INTO accounts (id, data) VALUES (?, '{}') ON CONFLICT (id) DO NOTHING")
                .bind(&line.account)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::commit_failed(id, e))?;
        }

        let header = sqlx::query("INSERT INTO transactions (id, timestamp, data) VALUES (?, ?, ?)")
            .bind(id)
            .bind(timestamp.to_ledger_string())
            .bind(&data)
            .execute(&mut *tx)
            .await;

        match header {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::debug!(transaction_id = id, error = %rollback_err, "Rollback failed");
                }
                return Ok(CommitStatus::AlreadyExists);
            }
            Err(e) => return Err(Error::commit_failed(id, e)),
        }

        for line in &txn.lines {
            sqlx::query("INSERT INTO lines (transaction_id, account_id, delta) VALUES (?, ?, ?)")
                .bind(id)
                .bind(&line.account)
                .bind(line.delta)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::commit_failed(id, e))?;
        }

        tx.commit().await.map_err(|e| Error::commit_failed(id, e))?;

        Ok(CommitStatus::Committed)
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("SQLite pool closed gracefully");
    }
}
