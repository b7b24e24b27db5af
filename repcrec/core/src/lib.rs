//! RepCRec: a replicated, multiversion data store simulator running the available copies
//! algorithm.
//!
//! A [`Database`] holds the sites and the transaction manager. Scripts and interactive input
//! run through a [`Session`], which owns the logical clock and the queue of operations waiting
//! for locks or for sites to come back.

pub mod command;
pub mod database;
pub mod error;
pub mod event;
pub mod invariants;
pub mod session;

pub use command::{Command, KEYWORDS, Statement, SyntaxError, parse_line, parse_script};
pub use database::{Database, DatabaseConfig};
pub use error::{Error, Result};
pub use event::{Event, QueryResult, SiteDump};
pub use repcrec_common as common;
pub use repcrec_storage as storage;
pub use repcrec_transaction as transaction;
pub use session::{Session, SessionStatus, TransactionStatus};
