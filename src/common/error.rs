use std::fmt;

use thiserror::Error;

use super::{PageID, TableID, TransactionID};

/// Why the lock manager gave up on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Deadlock,
    LockTimeout,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Deadlock => write!(f, "deadlock detected"),
            AbortReason::LockTimeout => write!(f, "lock wait timed out"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TxStoreError {
    #[error("Transaction {txn} aborted: {reason}")]
    TransactionAborted {
        txn: TransactionID,
        reason: AbortReason,
    },

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Log corrupted: {0}")]
    LogCorrupted(String),

    #[error("Transaction {0} has already begun")]
    DuplicateBegin(TransactionID),

    #[error("Transaction {0} not found")]
    UnknownTransaction(TransactionID),

    #[error("Table {0} is not registered")]
    UnknownTable(TableID),

    #[error("Page {0} not found")]
    PageNotFound(PageID),

    #[error("Other error: {0}")]
    Other(String),

    #[error("Invalid slot index: {0}")]
    InvalidSlotIndex(usize),

    #[error("Slot {0} is empty")]
    EmptySlot(usize),

    #[error("Deserialization error")]
    DeserializationError,

    #[error("Page size exceeded: got {0}, max {1}")]
    PageSizeExceeded(usize, usize),

    #[error("Tuple too large: got {0} bytes, max {1}")]
    TupleTooLarge(usize, usize),
}

impl TxStoreError {
    /// True for the lock-conflict signals a caller recovers from by
    /// aborting and retrying under a fresh transaction.
    pub fn is_abort(&self) -> bool {
        matches!(self, TxStoreError::TransactionAborted { .. })
    }
}

pub type Result<T> = std::result::Result<T, TxStoreError>;
