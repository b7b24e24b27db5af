use miette::Diagnostic;
use repcrec_common::TimestampError;
use repcrec_transaction::TransactionError;
use thiserror::Error;

use crate::command::SyntaxError;

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parser(#[from] SyntaxError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Timestamp(#[from] TimestampError),

    #[error("invalid configuration: {0}")]
    #[diagnostic(help("both the number of sites and of variables must be at least 1"))]
    InvalidConfig(String),

    #[error("the session is closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
