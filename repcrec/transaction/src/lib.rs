//! Transaction lifecycle for the replicated store: strict two-phase locking for read-write
//! transactions, snapshot reads for read-only ones, and deadlock detection over a waits-for
//! graph rebuilt from the lock tables.

pub mod error;
pub mod manager;
pub mod outcome;
pub mod transaction;
pub mod wait_graph;

pub use error::{TransactionError, TransactionResult};
pub use manager::TransactionManager;
pub use outcome::{
    CommittedWrite, Deadlock, EndResult, ReadResult, ReadSource, Wait, WriteResult,
};
pub use transaction::{AbortReason, LockRequest, Transaction, TxnKind, TxnState};
pub use wait_graph::WaitGraph;
