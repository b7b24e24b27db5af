//! Identifiers, logical time and shared constants for the RepCRec data store.

pub mod constants;
pub mod error;
pub mod timestamp;
pub mod types;

pub use error::{IdError, TimestampError};
pub use timestamp::{LogicalClock, Timestamp};
pub use types::{SiteId, TxnId, Value, VariableId};
