use crate::session::Checkpoint;
use crate::types::{Address, PaymentStatus, TxHash};
use std::time::Duration;
use thiserror::Error;

/// Every failure a payroll operation can surface to its caller.
///
/// Nothing in this crate retries on its own; `is_retryable` tells the caller which failures are
/// safe to retry blindly.
#[derive(Debug, Error)]
pub enum PayrollError {
    /// The wallet switched network or account while the operation was in flight.
    #[error("session changed {checkpoint}: {detail}")]
    SessionStale { checkpoint: Checkpoint, detail: String },

    #[error("encryption service unavailable: {0}")]
    EncryptionServiceUnavailable(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("transaction reverted: {0}")]
    TransactionReverted(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("salary already paid for employee {0}")]
    AlreadyPaid(Address),

    /// Another flow in this process is already settling the plan.
    #[error("a payment for employee {0} is already in flight")]
    PaymentInProgress(Address),

    #[error("payment status cannot move from {from} to {to}")]
    InvalidTransition { from: PaymentStatus, to: PaymentStatus },

    /// The confirmation did not arrive in time. The transaction may still land.
    #[error("no confirmation after {waited:?}{}", pending_tx(.tx_hash))]
    NetworkTimeout { tx_hash: Option<TxHash>, waited: Duration },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A request failed before its outcome was known.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),
}

fn pending_tx(tx_hash: &Option<TxHash>) -> String {
    match tx_hash {
        Some(hash) => format!(" for tx {hash}"),
        None => " before the node accepted the transaction".to_string(),
    }
}

/// Stable classification of [`PayrollError`], suitable for matching and user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SessionStale,
    EncryptionServiceUnavailable,
    InvalidAmount,
    TransactionReverted,
    InsufficientBalance,
    AlreadyPaid,
    PaymentInProgress,
    InvalidTransition,
    NetworkTimeout,
    NotFound,
    Unauthorized,
    Transport,
    Config,
}

impl PayrollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PayrollError::SessionStale { .. } => ErrorKind::SessionStale,
            PayrollError::EncryptionServiceUnavailable(_) => ErrorKind::EncryptionServiceUnavailable,
            PayrollError::InvalidAmount(_) => ErrorKind::InvalidAmount,
            PayrollError::TransactionReverted(_) => ErrorKind::TransactionReverted,
            PayrollError::InsufficientBalance(_) => ErrorKind::InsufficientBalance,
            PayrollError::AlreadyPaid(_) => ErrorKind::AlreadyPaid,
            PayrollError::PaymentInProgress(_) => ErrorKind::PaymentInProgress,
            PayrollError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            PayrollError::NetworkTimeout { .. } => ErrorKind::NetworkTimeout,
            PayrollError::NotFound(_) => ErrorKind::NotFound,
            PayrollError::Unauthorized(_) => ErrorKind::Unauthorized,
            PayrollError::Transport(_) => ErrorKind::Transport,
            PayrollError::Config(_) => ErrorKind::Config,
        }
    }

    /// Only encryption-service outages are safe to retry without re-reading ledger state.
    ///
    /// Timeouts and transport errors are ambiguous: the transaction may have been relayed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PayrollError::EncryptionServiceUnavailable(_))
    }

    /// True for any ledger-program rejection, including balance failures.
    pub fn is_revert(&self) -> bool {
        matches!(
            self,
            PayrollError::TransactionReverted(_) | PayrollError::InsufficientBalance(_)
        )
    }

    /// The caller must query the ledger before deciding whether to try again.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            PayrollError::NetworkTimeout { .. } | PayrollError::Transport(_)
        )
    }
}
