use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::error;

use crate::responses::RequestMeta;
use crate::store::StoreError;
use crate::types::RequestStatus;

pub const E_VALIDATION: &str = "VALIDATION_FAILED";
pub const E_UNAUTHENTICATED: &str = "UNAUTHENTICATED";
pub const E_FORBIDDEN: &str = "FORBIDDEN";
pub const E_NOT_FOUND: &str = "NOT_FOUND";
pub const E_DUPLICATE_REQUEST: &str = "DUPLICATE_REQUEST";
pub const E_ALREADY_CONNECTED: &str = "ALREADY_CONNECTED";
pub const E_INVALID_TRANSITION: &str = "INVALID_TRANSITION";
pub const E_PENDING_BALANCE: &str = "PENDING_BALANCE";
pub const E_CHAT_NOT_ALLOWED: &str = "CHAT_NOT_ALLOWED";
pub const E_CONFLICT: &str = "CONFLICT";
pub const E_DB_FAILURE: &str = "DB_FAILURE";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
            details: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(e) => {
                error!(request_id = %self.meta.request_id, "internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }
        if let Some(details) = self.details {
            body["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

/// Failures of the ledger, connection, chat and notification operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("a connection request already exists between you and this user")]
    DuplicateRequest { request_id: i64 },
    #[error("you are already connected with this user")]
    AlreadyConnected { request_id: i64 },
    #[error("cannot update request with status: {status}")]
    InvalidTransition { status: RequestStatus },
    #[error("connection has a pending balance of {pending_due}")]
    PendingBalance { pending_due: Decimal },
    #[error("chat is not allowed for this connection")]
    ChatNotAllowed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        LedgerError::Forbidden(msg.into())
    }

    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        let message = self.to_string();
        match self {
            LedgerError::Validation(_) => ApiError::BadRequest(message)
                .with_meta(meta)
                .with_code(E_VALIDATION),
            LedgerError::Unauthenticated(_) => ApiError::Unauthorized(message)
                .with_meta(meta)
                .with_code(E_UNAUTHENTICATED),
            LedgerError::Forbidden(_) => ApiError::Forbidden(message)
                .with_meta(meta)
                .with_code(E_FORBIDDEN),
            LedgerError::NotFound(_) => ApiError::NotFound(message)
                .with_meta(meta)
                .with_code(E_NOT_FOUND),
            LedgerError::DuplicateRequest { request_id } => ApiError::Conflict(message)
                .with_meta(meta)
                .with_code(E_DUPLICATE_REQUEST)
                .with_details(json!({ "request_id": request_id })),
            LedgerError::AlreadyConnected { request_id } => ApiError::Conflict(message)
                .with_meta(meta)
                .with_code(E_ALREADY_CONNECTED)
                .with_details(json!({ "request_id": request_id })),
            LedgerError::InvalidTransition { status } => ApiError::Conflict(message)
                .with_meta(meta)
                .with_code(E_INVALID_TRANSITION)
                .with_details(json!({ "status": status })),
            LedgerError::PendingBalance { pending_due } => ApiError::Conflict(message)
                .with_meta(meta)
                .with_code(E_PENDING_BALANCE)
                .with_details(json!({ "pending_due": pending_due })),
            LedgerError::ChatNotAllowed => ApiError::Conflict(message)
                .with_meta(meta)
                .with_code(E_CHAT_NOT_ALLOWED),
            LedgerError::Store(StoreError::Duplicate(what)) => {
                ApiError::Conflict(format!("{what} already exists"))
                    .with_meta(meta)
                    .with_code(E_CONFLICT)
            }
            LedgerError::Store(StoreError::BalanceOutOfRange(total)) => {
                ApiError::BadRequest(message)
                    .with_meta(meta)
                    .with_code(E_VALIDATION)
                    .with_details(json!({ "pending_due": total }))
            }
            LedgerError::Store(StoreError::Backend(e)) => ApiError::Internal(e)
                .with_meta(meta)
                .with_code(E_DB_FAILURE),
        }
    }
}
