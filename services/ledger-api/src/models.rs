use crate::errors::{ApiError, Result};
use ledger_core::types::data_or_empty;
use ledger_core::{Data, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST`/`PUT /v1/accounts` and `PUT /v1/transactions`
#[derive(Debug, Deserialize)]
pub struct DataRequest {
    pub id: String,
    #[serde(default, deserialize_with = "data_or_empty")]
    pub data: Data,
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    /// Cutoff timestamp; now when absent
    pub on: Option<String>,
}

impl BalanceQuery {
    pub fn cutoff(&self) -> Result<Timestamp> {
        match self.on.as_deref().map(str::trim) {
            Some(on) if !on.is_empty() => Ok(Timestamp::parse(on)?),
            _ => Ok(Timestamp::now()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub account_id: String,
    pub on: Timestamp,
    pub balance: i64,
}

/// Decode a JSON object request body.
///
/// Arrays are refused up front; derived struct deserialization would
/// otherwise bind them by position.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    match serde_json::from_slice::<Value>(body)? {
        object @ Value::Object(_) => Ok(serde_json::from_value(object)?),
        _ => Err(ApiError::BadRequest(
            "Request body must be a JSON object".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_request_null_data() {
        let request: DataRequest = parse_body(br#"{"id": "acc1", "data": null}"#).unwrap();
        assert_eq!(request.id, "acc1");
        assert!(request.data.is_empty());

        let request: DataRequest = parse_body(br#"{"id": "acc1"}"#).unwrap();
        assert!(request.data.is_empty());
    }

    #[test]
    fn test_malformed_body() {
        let result: Result<DataRequest> = parse_body(b"{\"id\": ");
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let result: Result<DataRequest> = parse_body(br#"{"data": {}}"#);
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        for body in [r#"["acc1"]"#, r#"["acc1", {"status": "x"}]"#, "null", "\"acc1\""] {
            let result: Result<DataRequest> = parse_body(body.as_bytes());
            assert!(matches!(result, Err(ApiError::BadRequest(_))));
        }

        let result: Result<ledger_core::Transaction> = parse_body(br#"["t1"]"#);
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_balance_cutoff() {
        let query = BalanceQuery {
            on: Some("2018-01-01 10:00:00".to_string()),
        };
        assert_eq!(
            query.cutoff().unwrap().to_ledger_string(),
            "2018-01-01 10:00:00.000"
        );

        let query = BalanceQuery {
            on: Some("yesterday".to_string()),
        };
        assert!(matches!(query.cutoff(), Err(ApiError::Ledger(_))));

        let query = BalanceQuery { on: None };
        assert!(query.cutoff().unwrap() <= Timestamp::now());
    }
}
