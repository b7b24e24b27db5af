use repcrec_common::{TimestampError, TxnId};
use repcrec_storage::StorageError;
use thiserror::Error;

pub type TransactionResult<T> = Result<T, TransactionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction {0} already exists")]
    DuplicateTransaction(TxnId),

    #[error("transaction {0} does not exist")]
    UnknownTransaction(TxnId),

    #[error("transaction {0} has already finished")]
    TransactionFinished(TxnId),

    #[error("transaction {0} was aborted; only `end` is accepted")]
    TransactionAborted(TxnId),

    #[error("transaction {0} is blocked and cannot end")]
    TransactionBlocked(TxnId),

    #[error("read-only transaction {0} cannot write")]
    ReadOnlyWrite(TxnId),

    #[error(transparent)]
    Clock(#[from] TimestampError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
