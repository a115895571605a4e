//! Core types for the ledger
//!
//! Amounts are signed integers in the smallest currency unit. Balances are
//! never stored: they are always derived from committed lines.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Open metadata map attached to accounts and transactions
pub type Data = serde_json::Map<String, serde_json::Value>;

/// Layout of every timestamp the ledger stores or returns
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

static VALID_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z_]+$").unwrap());

/// Whether `key` may be used as a data-map key or column name
pub fn is_valid_key(key: &str) -> bool {
    VALID_KEY.is_match(key)
}

/// Check every top-level key of a data map
pub fn validate_data_keys(data: &Data) -> crate::Result<()> {
    match data.keys().find(|key| !is_valid_key(key)) {
        Some(key) => Err(crate::Error::InvalidInput(format!(
            "Invalid key in data json: {key:?}"
        ))),
        None => Ok(()),
    }
}

/// Deserialize a data map, treating `null` as empty
pub fn data_or_empty<'de, D>(deserializer: D) -> Result<Data, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Data>::deserialize(deserializer)?.unwrap_or_default())
}

/// UTC timestamp truncated to millisecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    /// Current time
    pub fn now() -> Self {
        Self(Utc::now().naive_utc().trunc_subsecs(3))
    }

    /// Parse `YYYY-MM-DD HH:MM:SS[.fff]` (UTC) or RFC 3339
    pub fn parse(input: &str) -> crate::Result<Self> {
        let input = input.trim();
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S%.f") {
            return Ok(Self(naive.trunc_subsecs(3)));
        }
        DateTime::parse_from_rfc3339(input)
            .map(|dt| Self(dt.naive_utc().trunc_subsecs(3)))
            .map_err(|e| crate::Error::InvalidInput(format!("Invalid timestamp {input:?}: {e}")))
    }

    /// Canonical storage form, e.g. `2018-01-01 10:00:00.000`
    pub fn to_ledger_string(&self) -> String {
        self.0.format(TIMESTAMP_FORMAT).to_string()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_ledger_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Ledger account with its derived balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Opaque account identifier
    pub id: String,

    /// Sum of all committed deltas referencing this account
    #[serde(default)]
    pub balance: i64,

    /// Free-form metadata
    #[serde(default, deserialize_with = "data_or_empty")]
    pub data: Data,
}

/// One account/delta pair of a transaction
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionLine {
    /// Referenced account
    pub account: String,

    /// Signed amount, positive = credit
    pub delta: i64,
}

impl TransactionLine {
    /// Create a new line
    pub fn new(account: impl Into<String>, delta: i64) -> Self {
        Self {
            account: account.into(),
            delta,
        }
    }
}

/// Balanced transaction submitted to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Caller-chosen unique ID (idempotency key)
    pub id: String,

    /// Caller-supplied timestamp; the server assigns one when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,

    /// Free-form metadata
    #[serde(default, deserialize_with = "data_or_empty")]
    pub data: Data,

    /// Lines, summing to zero
    #[serde(default)]
    pub lines: Vec<TransactionLine>,
}

impl Transaction {
    /// Create a transaction with no metadata and no explicit timestamp
    pub fn new(id: impl Into<String>, lines: Vec<TransactionLine>) -> Self {
        Self {
            id: id.into(),
            timestamp: None,
            data: Data::new(),
            lines,
        }
    }

    /// Attach metadata
    pub fn with_data(mut self, data: Data) -> Self {
        self.data = data;
        self
    }

    /// Pin the timestamp
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Double-entry invariant: Σ delta == 0
    pub fn is_balanced(&self) -> bool {
        self.lines.iter().map(|line| line.delta as i128).sum::<i128>() == 0
    }

    /// Structural validation, performed before any storage access
    pub fn validate(&self) -> crate::Result<()> {
        if self.id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "Transaction id is required".to_string(),
            ));
        }
        if self.lines.iter().any(|line| line.account.trim().is_empty()) {
            return Err(crate::Error::InvalidInput(format!(
                "Transaction {} has a line without an account",
                self.id
            )));
        }
        if !self.is_balanced() {
            return Err(crate::Error::InvalidInput(format!(
                "Transaction {} is unbalanced: deltas must sum to zero",
                self.id
            )));
        }
        validate_data_keys(&self.data)
    }
}

/// Whether two line lists hold the same `(account, delta)` multiset
pub fn same_lines(left: &[TransactionLine], right: &[TransactionLine]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut left = left.to_vec();
    let mut right = right.to_vec();
    left.sort();
    right.sort();
    left == right
}

/// Result of submitting a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// This call committed the transaction
    Created,
    /// Identical lines were already committed under this ID
    Duplicate,
    /// Different lines were already committed under this ID
    Conflict,
}

impl TransactionOutcome {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionOutcome::Created => "created",
            TransactionOutcome::Duplicate => "duplicate",
            TransactionOutcome::Conflict => "conflict",
        }
    }
}

impl fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
