use std::fmt;

use itertools::Itertools;
use repcrec_common::{SiteId, Timestamp, TxnId, Value, VariableId};
use serde::Serialize;

use crate::transaction::AbortReason;

/// A wait-for cycle and the transaction aborted to break it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deadlock {
    pub cycle: Vec<TxnId>,
    pub victim: TxnId,
}

impl fmt::Display for Deadlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deadlock {} -> {}, aborting {}",
            self.cycle.iter().join(" -> "),
            self.cycle.first().map_or_else(String::new, ToString::to_string),
            self.victim
        )
    }
}

/// Why a request could not be served yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Wait {
    /// A transaction holding a conflicting lock, or `None` when waiting for a site to come up.
    pub blocked_by: Option<TxnId>,
    /// Cycles broken while handling the denied request.
    pub deadlocks: Vec<Deadlock>,
}

impl Wait {
    pub fn victims(&self) -> impl Iterator<Item = TxnId> + '_ {
        self.deadlocks.iter().map(|d| d.victim)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSource {
    Site(SiteId),
    /// The transaction's own uncommitted write.
    OwnWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReadResult {
    Value { value: Value, source: ReadSource },
    /// No available version for a read-only transaction, which is aborted.
    NoQualifiedValue,
    Blocked(Wait),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WriteResult {
    /// The write is buffered; the sites are the ones it will be applied to if committed now.
    Written { sites: Vec<SiteId> },
    Blocked(Wait),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedWrite {
    pub variable: VariableId,
    pub value: Value,
    pub sites: Vec<SiteId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EndResult {
    Committed {
        at: Timestamp,
        writes: Vec<CommittedWrite>,
    },
    Aborted {
        reason: AbortReason,
    },
}
