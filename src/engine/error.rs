//! Error types for transfer processing.

use serde::Serialize;
use thiserror::Error;

use crate::Amount;
use crate::model::{PrincipalId, Role, Status, TransactionKind};
use crate::store::StoreError;
use crate::wallet::WalletId;

/// Top-level error returned by the transfer operations of [`Engine`](super::Engine).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("not found: {0}")]
    NotFound(#[from] NotFound),

    #[error("forbidden: {0}")]
    Forbidden(#[from] Forbidden),

    #[error(
        "wallet {wallet} does not have enough balance: current balance is {balance}, requested {requested}"
    )]
    InsufficientFunds {
        wallet: WalletId,
        balance: Amount,
        requested: Amount,
    },

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

/// The request itself is malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("counterparty phone number is required")]
    MissingCounterparty,
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),
    #[error("{0} amount {1} is below the minimum of {2}")]
    BelowMinimum(TransactionKind, Amount, Amount),
    #[error("top-up amount {0} must be greater than {1}")]
    TopUpTooSmall(Amount, Amount),
    #[error("top-up amount {0} exceeds the maximum of {1}")]
    TopUpTooLarge(Amount, Amount),
}

/// Something the request refers to does not exist.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotFound {
    #[error("principal {0} not found")]
    Principal(PrincipalId),
    #[error("no account with phone number {0}")]
    Counterparty(String),
    #[error("wallet of principal {0} not found")]
    Wallet(PrincipalId),
}

/// A business rule forbids the transfer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Forbidden {
    #[error("this account is {0}, can't do this transaction")]
    InitiatorStatus(Status),
    #[error("this account is deleted")]
    InitiatorDeleted,
    #[error("a {1} can't initiate {0}")]
    InitiatorRole(TransactionKind, Role),
    #[error("this agent account is pending approval")]
    InitiatorPendingApproval,
    #[error("your wallet is blocked")]
    InitiatorWalletBlocked,
    #[error("cannot transfer to yourself")]
    SelfTransfer,
    #[error("{0} requires an agent counterparty, got a {1}")]
    CounterpartyRole(TransactionKind, Role),
    #[error("counterparty account is {0}")]
    CounterpartyStatus(Status),
    #[error("counterparty agent is pending approval")]
    CounterpartyPendingApproval,
    #[error("counterparty account is deleted")]
    CounterpartyDeleted,
    #[error("counterparty wallet is blocked")]
    CounterpartyWalletBlocked,
    #[error("counterparty wallet is deleted")]
    CounterpartyWalletDeleted,
}

/// Coarse classification of an [`EngineError`] for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Forbidden,
    InsufficientFunds,
    /// The unit of work could not commit; safe to retry from scratch.
    Conflict,
    /// Storage was unavailable within its timeout; safe to retry from scratch.
    Transient,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            EngineError::Storage(StoreError::LockTimeout(_)) => ErrorKind::Transient,
            EngineError::Storage(_) => ErrorKind::Conflict,
        }
    }

    /// Closest HTTP status for the error.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidInput | ErrorKind::InsufficientFunds => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Transient => 503,
        }
    }

    /// Client errors are never worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Transient)
    }
}

/// Serializable failure shape handed to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error_kind: ErrorKind,
    pub http_status: u16,
    pub message: String,
}

impl From<&EngineError> for ErrorReport {
    fn from(error: &EngineError) -> Self {
        Self {
            error_kind: error.kind(),
            http_status: error.http_status(),
            message: error.to_string(),
        }
    }
}
