//! Per-transaction state kept by the transaction manager.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use repcrec_common::{SiteId, Timestamp, TxnId, Value, VariableId};
use repcrec_storage::LockMode;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxnKind {
    /// Strict two-phase locking, writes buffered until commit.
    ReadWrite,
    /// Lock-free reads from the snapshot at the start time.
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnState {
    Active,
    Blocked,
    Committed,
    Aborted,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// Chosen as the youngest member of a wait-for cycle.
    Deadlock,
    /// A site it read from or write-locked failed before it could commit.
    SiteFailure { site: SiteId },
    /// A read-only read found no available version.
    NoQualifiedValue { variable: VariableId },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deadlock => write!(f, "deadlock victim"),
            Self::SiteFailure { site } => write!(f, "site {site} failed after it was accessed"),
            Self::NoQualifiedValue { variable } => {
                write!(f, "no qualified value for {variable}")
            }
        }
    }
}

/// The lock request a blocked transaction is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockRequest {
    pub variable: VariableId,
    pub mode: LockMode,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    id: TxnId,
    kind: TxnKind,
    start_ts: Timestamp,
    state: TxnState,
    abort_reason: Option<AbortReason>,
    blocked_by: Option<TxnId>,
    waiting_on: Option<LockRequest>,
    /// Uncommitted writes, applied to the sites only at commit.
    writes: BTreeMap<VariableId, Value>,
    visited: BTreeSet<SiteId>,
    /// Sites it read from or holds a write lock at, with the time of the first such access.
    accessed: BTreeMap<SiteId, Timestamp>,
    locks: BTreeMap<VariableId, BTreeSet<SiteId>>,
}

impl Transaction {
    pub fn new(id: TxnId, kind: TxnKind, start_ts: Timestamp) -> Self {
        Self {
            id,
            kind,
            start_ts,
            state: TxnState::Active,
            abort_reason: None,
            blocked_by: None,
            waiting_on: None,
            writes: BTreeMap::new(),
            visited: BTreeSet::new(),
            accessed: BTreeMap::new(),
            locks: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> TxnId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> TxnKind {
        self.kind
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.kind == TxnKind::ReadOnly
    }

    #[inline]
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    #[inline]
    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_aborted(&self) -> bool {
        self.state == TxnState::Aborted
    }

    pub fn is_blocked(&self) -> bool {
        self.state == TxnState::Blocked
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    pub fn blocked_by(&self) -> Option<TxnId> {
        self.blocked_by
    }

    pub fn waiting_on(&self) -> Option<LockRequest> {
        self.waiting_on
    }

    /// Orders transactions by age: a greater key is younger.
    pub fn age_key(&self) -> (Timestamp, TxnId) {
        (self.start_ts, self.id)
    }

    pub fn writes(&self) -> &BTreeMap<VariableId, Value> {
        &self.writes
    }

    pub fn buffered(&self, variable: VariableId) -> Option<Value> {
        self.writes.get(&variable).copied()
    }

    pub fn visited_sites(&self) -> &BTreeSet<SiteId> {
        &self.visited
    }

    /// Sites whose failure before commit aborts the transaction.
    pub fn accessed_sites(&self) -> &BTreeMap<SiteId, Timestamp> {
        &self.accessed
    }

    /// Sites at which the transaction holds a lock on `variable`.
    pub fn lock_holding_sites(&self, variable: VariableId) -> Option<&BTreeSet<SiteId>> {
        self.locks.get(&variable)
    }

    pub(crate) fn buffer_write(&mut self, variable: VariableId, value: Value) {
        self.writes.insert(variable, value);
    }

    pub(crate) fn visit(&mut self, site: SiteId) {
        self.visited.insert(site);
    }

    pub(crate) fn record_lock(&mut self, variable: VariableId, site: SiteId) {
        self.visited.insert(site);
        self.locks.entry(variable).or_default().insert(site);
    }

    pub(crate) fn record_access(&mut self, site: SiteId, ts: Timestamp) {
        self.visited.insert(site);
        self.accessed.entry(site).or_insert(ts);
    }

    pub(crate) fn block(&mut self, request: LockRequest, owner: Option<TxnId>) {
        self.state = TxnState::Blocked;
        self.waiting_on = Some(request);
        self.blocked_by = owner;
    }

    pub(crate) fn unblock(&mut self) {
        if self.state == TxnState::Blocked {
            self.state = TxnState::Active;
        }
        self.waiting_on = None;
        self.blocked_by = None;
    }

    /// Discards buffered writes and lock bookkeeping. The first reason sticks.
    pub(crate) fn abort(&mut self, reason: AbortReason) {
        if self.state != TxnState::Aborted {
            self.state = TxnState::Aborted;
            self.abort_reason = Some(reason);
        }
        self.waiting_on = None;
        self.blocked_by = None;
        self.writes.clear();
        self.accessed.clear();
        self.locks.clear();
    }

    pub(crate) fn commit(&mut self) {
        self.state = TxnState::Committed;
        self.waiting_on = None;
        self.blocked_by = None;
        self.accessed.clear();
        self.locks.clear();
    }
}
