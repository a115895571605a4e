use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use ledger_core::ErrorKind;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] ledger_core::Error),

    #[error("Malformed request body: {0}")]
    BadRequest(String),

    #[error("Unauthorized access")]
    Unauthorized,
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        // Search clients get the status only
        if let ApiError::Ledger(err) = self {
            match err.kind() {
                ErrorKind::InvalidQuery | ErrorKind::InvalidNamespace => {
                    tracing::info!(error = %err, "Rejected search query");
                    return HttpResponse::build(status_code).finish();
                }
                ErrorKind::Internal => {
                    tracing::error!(error = %err, "Request failed");
                }
                _ => {}
            }
        }

        let error_message = match self {
            ApiError::Ledger(err) if err.kind() == ErrorKind::Internal => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ledger(err) => match err.kind() {
                ErrorKind::InvalidInput | ErrorKind::InvalidQuery => StatusCode::BAD_REQUEST,
                ErrorKind::InvalidNamespace | ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl ApiError {
    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Ledger(err) => err.kind().code(),
            ApiError::BadRequest(_) => "malformed_body",
            ApiError::Unauthorized => "unauthorized",
        }
    }
}
