use thiserror::Error;

use crate::timestamp::Timestamp;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("clock went backwards: current {current}, given {given}")]
    Regression { current: Timestamp, given: Timestamp },

    #[error("timestamp overflow, reached {0}")]
    Overflow(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid transaction id \"{0}\": expected `T<number>`")]
    InvalidTxnId(String),

    #[error("invalid site id \"{0}\": expected a positive number")]
    InvalidSiteId(String),

    #[error("invalid variable \"{0}\": expected `x<number>`")]
    InvalidVariable(String),
}
