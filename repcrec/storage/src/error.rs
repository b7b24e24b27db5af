use repcrec_common::{SiteId, Timestamp, TxnId, VariableId};
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("site {0} does not exist")]
    UnknownSite(SiteId),

    #[error("variable {0} does not exist")]
    UnknownVariable(VariableId),

    #[error("variable {variable} is not stored at site {site}")]
    NotStoredAt { variable: VariableId, site: SiteId },

    #[error("site {0} is down")]
    SiteDown(SiteId),

    #[error("site {0} is already down")]
    SiteAlreadyDown(SiteId),

    #[error("site {0} is already up")]
    SiteAlreadyUp(SiteId),

    #[error("site {site} already failed at {last}, cannot fail again at {given}")]
    NonMonotonicFailure {
        site: SiteId,
        last: Timestamp,
        given: Timestamp,
    },

    #[error(
        "variable {variable} at site {site} already has a version committed at {last}, cannot \
         commit at {given}"
    )]
    NonMonotonicCommit {
        variable: VariableId,
        site: SiteId,
        last: Timestamp,
        given: Timestamp,
    },

    #[error("{txn} cannot lock {variable} at site {site}: held by {holders:?}")]
    LockConflict {
        txn: TxnId,
        variable: VariableId,
        site: SiteId,
        holders: Vec<TxnId>,
    },
}
