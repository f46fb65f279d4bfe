use crate::access::AccessLevel;
use crate::trade::TradeId;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// The coarse failure taxonomy callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    DuplicateIdentifier,
    InvalidArgument,
    OutOfRange,
    Storage,
}

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("actor {actor} is not permitted to {action} (requires {required}, has {actual})")]
    Unauthorized {
        actor: String,
        action: &'static str,
        required: AccessLevel,
        actual: AccessLevel,
    },
    #[error("trade {0} has already been recorded")]
    DuplicateIdentifier(TradeId),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("position {position} is out of range for a ledger of {count} trades")]
    OutOfRange { position: u64, count: u64 },
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("ledger state is inconsistent: {0}")]
    Corrupted(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Unauthorized { .. } => ErrorKind::Unauthorized,
            LedgerError::DuplicateIdentifier(_) => ErrorKind::DuplicateIdentifier,
            LedgerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LedgerError::OutOfRange { .. } => ErrorKind::OutOfRange,
            LedgerError::Storage(_)
            | LedgerError::Encode(_)
            | LedgerError::Decode(_)
            | LedgerError::Corrupted(_) => ErrorKind::Storage,
        }
    }
}

impl From<sled::transaction::TransactionError<LedgerError>> for LedgerError {
    fn from(err: sled::transaction::TransactionError<LedgerError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => LedgerError::Storage(e),
        }
    }
}
