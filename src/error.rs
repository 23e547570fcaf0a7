// region:    --- Imports
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use thiserror::Error;
// endregion: --- Imports

// region:    --- Store Error

/// Failures reported by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Serialization failure or deadlock; the whole operation may be retried.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // serialization_failure, deadlock_detected
            if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
                return StoreError::Conflict(db_err.message().to_string());
            }
        }
        StoreError::Backend(err.to_string())
    }
}

// endregion: --- Store Error

// region:    --- Core Error

/// Error classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    PreconditionFailed,
    Authorization,
    NotFound,
    ConcurrencyConflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("auction {0} is not accepting bids")]
    AuctionNotActive(i64),

    #[error("auction {0} has already ended")]
    AuctionEnded(i64),

    #[error("bid of {amount} must exceed the current highest bid of {current}")]
    BidTooLow { amount: i64, current: i64 },

    #[error("auction {0} has reached its participant limit")]
    AuctionFull(i64),

    #[error("auction {0} can no longer be edited")]
    EditLocked(i64),

    #[error("payment window for auction {0} is closed")]
    PaymentWindowClosed(i64),

    #[error("only the owner may modify auction {0}")]
    NotOwner(i64),

    #[error("the owner cannot bid on their own auction")]
    OwnerCannotBid,

    #[error("the owner cannot join their own auction")]
    OwnerCannotJoin,

    #[error("bidder is banned until {0}")]
    BidderBanned(DateTime<Utc>),

    #[error("user is banned until {0}")]
    UserBanned(DateTime<Utc>),

    #[error("missing caller identity")]
    Unauthenticated,

    #[error("auction {0} not found")]
    AuctionNotFound(i64),

    #[error("notification {0} not found")]
    NotificationNotFound(String),

    #[error("operation kept conflicting after {0} attempts")]
    ConcurrencyConflict(u32),

    #[error(transparent)]
    Storage(StoreError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::AuctionNotActive(_)
            | CoreError::AuctionEnded(_)
            | CoreError::BidTooLow { .. }
            | CoreError::AuctionFull(_)
            | CoreError::EditLocked(_)
            | CoreError::PaymentWindowClosed(_) => ErrorKind::PreconditionFailed,
            CoreError::NotOwner(_)
            | CoreError::OwnerCannotBid
            | CoreError::OwnerCannotJoin
            | CoreError::BidderBanned(_)
            | CoreError::UserBanned(_)
            | CoreError::Unauthenticated => ErrorKind::Authorization,
            CoreError::AuctionNotFound(_) | CoreError::NotificationNotFound(_) => {
                ErrorKind::NotFound
            }
            CoreError::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            CoreError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Stable reason code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION_FAILED",
            CoreError::AuctionNotActive(_) => "AUCTION_NOT_ACTIVE",
            CoreError::AuctionEnded(_) => "AUCTION_ENDED",
            CoreError::BidTooLow { .. } => "BID_TOO_LOW",
            CoreError::AuctionFull(_) => "AUCTION_FULL",
            CoreError::EditLocked(_) => "EDIT_LOCKED",
            CoreError::PaymentWindowClosed(_) => "PAYMENT_WINDOW_CLOSED",
            CoreError::NotOwner(_) => "NOT_OWNER",
            CoreError::OwnerCannotBid => "OWNER_CANNOT_BID",
            CoreError::OwnerCannotJoin => "OWNER_CANNOT_JOIN",
            CoreError::BidderBanned(_) => "BIDDER_BANNED",
            CoreError::UserBanned(_) => "USER_BANNED",
            CoreError::Unauthenticated => "UNAUTHENTICATED",
            CoreError::AuctionNotFound(_) => "AUCTION_NOT_FOUND",
            CoreError::NotificationNotFound(_) => "NOTIFICATION_NOT_FOUND",
            CoreError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            CoreError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        CoreError::Storage(err)
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::PreconditionFailed => StatusCode::CONFLICT,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ConcurrencyConflict => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({
                "error": self.to_string(),
                "code": self.code(),
            })),
        )
            .into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

// endregion: --- Core Error
