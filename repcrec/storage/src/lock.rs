//! Per-site lock table.
//!
//! Each variable has an explicit [`LockState`] and at most one pending writer. A transaction
//! upgrading its own shared lock must yield to a writer that queued before it.

use std::collections::{BTreeMap, BTreeSet};

use repcrec_common::{Timestamp, TxnId, VariableId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A granted lock, or a pending request when stored as a waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Lock {
    pub mode: LockMode,
    pub owner: TxnId,
    pub acquired_at: Timestamp,
}

/// Holders of the lock on one variable at one site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LockState {
    #[default]
    Unlocked,
    /// Never empty: the last holder leaving turns the state back into `Unlocked`.
    Shared(BTreeMap<TxnId, Timestamp>),
    Exclusive { owner: TxnId, acquired_at: Timestamp },
}

impl LockState {
    pub fn holders(&self) -> Vec<Lock> {
        match self {
            Self::Unlocked => Vec::new(),
            Self::Shared(holders) => holders
                .iter()
                .map(|(&owner, &acquired_at)| Lock {
                    mode: LockMode::Shared,
                    owner,
                    acquired_at,
                })
                .collect(),
            Self::Exclusive { owner, acquired_at } => vec![Lock {
                mode: LockMode::Exclusive,
                owner: *owner,
                acquired_at: *acquired_at,
            }],
        }
    }

    /// The mode in which `txn` holds this lock, if at all.
    pub fn mode_of(&self, txn: TxnId) -> Option<LockMode> {
        match self {
            Self::Unlocked => None,
            Self::Shared(holders) => holders.contains_key(&txn).then_some(LockMode::Shared),
            Self::Exclusive { owner, .. } => (*owner == txn).then_some(LockMode::Exclusive),
        }
    }

    fn release(&mut self, txn: TxnId) -> bool {
        match self {
            Self::Unlocked => false,
            Self::Shared(holders) => {
                let released = holders.remove(&txn).is_some();
                if holders.is_empty() {
                    *self = Self::Unlocked;
                }
                released
            }
            Self::Exclusive { owner, .. } => {
                let released = *owner == txn;
                if released {
                    *self = Self::Unlocked;
                }
                released
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LockEntry {
    state: LockState,
    pending: Option<Lock>,
}

impl LockEntry {
    fn is_idle(&self) -> bool {
        self.state == LockState::Unlocked && self.pending.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LockTable {
    entries: BTreeMap<VariableId, LockEntry>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, variable: VariableId) -> LockState {
        self.entries
            .get(&variable)
            .map(|e| e.state.clone())
            .unwrap_or_default()
    }

    pub fn pending(&self, variable: VariableId) -> Option<Lock> {
        self.entries.get(&variable).and_then(|e| e.pending)
    }

    pub fn can_acquire_shared(&self, txn: TxnId, variable: VariableId) -> bool {
        match self.entries.get(&variable).map(|e| &e.state) {
            Some(LockState::Exclusive { owner, .. }) => *owner == txn,
            _ => true,
        }
    }

    pub fn can_acquire_exclusive(&self, txn: TxnId, variable: VariableId) -> bool {
        let Some(entry) = self.entries.get(&variable) else {
            return true;
        };
        match &entry.state {
            LockState::Unlocked => true,
            LockState::Exclusive { owner, .. } => *owner == txn,
            LockState::Shared(holders) => {
                holders.keys().all(|&holder| holder == txn)
                    && entry.pending.is_none_or(|p| p.owner == txn)
            }
        }
    }

    /// Returns `false` and leaves the table untouched if the lock is not grantable.
    #[must_use]
    pub fn acquire_shared(&mut self, txn: TxnId, variable: VariableId, ts: Timestamp) -> bool {
        if !self.can_acquire_shared(txn, variable) {
            return false;
        }
        let entry = self.entries.entry(variable).or_default();
        // An exclusive lock of `txn` already covers reading.
        if let LockState::Shared(holders) = &mut entry.state {
            holders.entry(txn).or_insert(ts);
        } else if entry.state == LockState::Unlocked {
            entry.state = LockState::Shared(BTreeMap::from([(txn, ts)]));
        }
        true
    }

    /// Returns `false` and leaves the table untouched if the lock is not grantable.
    ///
    /// A shared lock held by `txn` is promoted; the acquisition time of the promoted lock is the
    /// time of the upgrade.
    #[must_use]
    pub fn acquire_exclusive(&mut self, txn: TxnId, variable: VariableId, ts: Timestamp) -> bool {
        if !self.can_acquire_exclusive(txn, variable) {
            return false;
        }
        let entry = self.entries.entry(variable).or_default();
        if entry.state.mode_of(txn) != Some(LockMode::Exclusive) {
            entry.state = LockState::Exclusive {
                owner: txn,
                acquired_at: ts,
            };
        }
        if entry.pending.is_some_and(|p| p.owner == txn) {
            entry.pending = None;
        }
        true
    }

    /// Records `txn` as the writer waiting for `variable`, unless another writer already waits.
    pub fn queue_waiting(&mut self, txn: TxnId, variable: VariableId, ts: Timestamp) {
        let entry = self.entries.entry(variable).or_default();
        if entry.pending.is_none() {
            entry.pending = Some(Lock {
                mode: LockMode::Exclusive,
                owner: txn,
                acquired_at: ts,
            });
        }
    }

    pub fn clear_waiting(&mut self, txn: TxnId, variable: VariableId) {
        if let Some(entry) = self.entries.get_mut(&variable) {
            if entry.pending.is_some_and(|p| p.owner == txn) {
                entry.pending = None;
            }
        }
    }

    /// Transactions a request of `txn` for `variable` in `mode` has to wait for.
    ///
    /// Empty exactly when the request is grantable.
    pub fn conflicting_owners(
        &self,
        txn: TxnId,
        variable: VariableId,
        mode: LockMode,
    ) -> BTreeSet<TxnId> {
        let Some(entry) = self.entries.get(&variable) else {
            return BTreeSet::new();
        };
        match (&entry.state, mode) {
            (LockState::Unlocked, _) => BTreeSet::new(),
            (LockState::Exclusive { owner, .. }, _) if *owner != txn => BTreeSet::from([*owner]),
            (LockState::Exclusive { .. }, _) => BTreeSet::new(),
            (LockState::Shared(_), LockMode::Shared) => BTreeSet::new(),
            (LockState::Shared(holders), LockMode::Exclusive) => {
                let others: BTreeSet<_> =
                    holders.keys().copied().filter(|&h| h != txn).collect();
                if !others.is_empty() {
                    return others;
                }
                entry
                    .pending
                    .filter(|p| p.owner != txn)
                    .map(|p| BTreeSet::from([p.owner]))
                    .unwrap_or_default()
            }
        }
    }

    /// Drops every lock and pending request of `txn`. Returns the variables it had locked.
    pub fn release_all(&mut self, txn: TxnId) -> Vec<VariableId> {
        let mut released = Vec::new();
        for (&variable, entry) in &mut self.entries {
            if entry.state.release(txn) {
                released.push(variable);
            }
            if entry.pending.is_some_and(|p| p.owner == txn) {
                entry.pending = None;
            }
        }
        self.entries.retain(|_, entry| !entry.is_idle());
        released
    }

    /// Locks currently held by `txn`.
    pub fn held_by(&self, txn: TxnId) -> Vec<(VariableId, LockMode)> {
        self.entries
            .iter()
            .filter_map(|(&variable, entry)| entry.state.mode_of(txn).map(|mode| (variable, mode)))
            .collect()
    }

    /// All non-idle entries, for inspection.
    pub fn iter(&self) -> impl Iterator<Item = (VariableId, &LockState, Option<Lock>)> {
        self.entries
            .iter()
            .map(|(&variable, entry)| (variable, &entry.state, entry.pending))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: TxnId = TxnId::new(1);
    const T2: TxnId = TxnId::new(2);
    const T3: TxnId = TxnId::new(3);

    fn x(index: u32) -> VariableId {
        VariableId::new(index).unwrap()
    }

    fn ts(tick: u64) -> Timestamp {
        Timestamp::with_ts(tick)
    }

    #[test]
    fn test_shared_locks_coexist() {
        let mut table = LockTable::new();
        assert!(table.acquire_shared(T1, x(2), ts(1)));
        assert!(table.acquire_shared(T2, x(2), ts(2)));
        let holders: Vec<_> = table.state(x(2)).holders().iter().map(|l| l.owner).collect();
        assert_eq!(holders, vec![T1, T2]);
        assert!(!table.can_acquire_exclusive(T1, x(2)));
        assert_eq!(
            table.conflicting_owners(T1, x(2), LockMode::Exclusive),
            BTreeSet::from([T2])
        );
    }

    #[test]
    fn test_exclusive_excludes_everyone_else() {
        let mut table = LockTable::new();
        assert!(table.acquire_exclusive(T1, x(4), ts(1)));
        assert!(!table.can_acquire_shared(T2, x(4)));
        assert!(!table.acquire_shared(T2, x(4), ts(2)));
        assert!(!table.acquire_exclusive(T2, x(4), ts(2)));
        assert_eq!(
            table.conflicting_owners(T2, x(4), LockMode::Shared),
            BTreeSet::from([T1])
        );
        // Re-entrant for the owner, in both modes.
        assert!(table.acquire_shared(T1, x(4), ts(3)));
        assert!(table.acquire_exclusive(T1, x(4), ts(3)));
        assert_eq!(table.state(x(4)), LockState::Exclusive {
            owner: T1,
            acquired_at: ts(1)
        });
    }

    #[test]
    fn test_upgrade_own_shared_lock() {
        let mut table = LockTable::new();
        assert!(table.acquire_shared(T1, x(6), ts(1)));
        assert!(table.can_acquire_exclusive(T1, x(6)));
        assert!(table.acquire_exclusive(T1, x(6), ts(2)));
        assert_eq!(table.state(x(6)).mode_of(T1), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_upgrade_yields_to_queued_writer() {
        let mut table = LockTable::new();
        assert!(table.acquire_shared(T1, x(6), ts(1)));
        assert!(table.acquire_shared(T2, x(6), ts(2)));
        table.queue_waiting(T2, x(6), ts(3));
        assert_eq!(table.release_all(T2), vec![x(6)]);
        assert!(table.pending(x(6)).is_none());

        // T3 queues a write before T1 asks to upgrade.
        table.queue_waiting(T3, x(6), ts(4));
        assert_eq!(table.pending(x(6)).unwrap().owner, T3);
        assert!(!table.can_acquire_exclusive(T1, x(6)));
        assert_eq!(
            table.conflicting_owners(T1, x(6), LockMode::Exclusive),
            BTreeSet::from([T3])
        );
    }

    #[test]
    fn test_only_first_waiter_is_recorded() {
        let mut table = LockTable::new();
        assert!(table.acquire_exclusive(T1, x(8), ts(1)));
        table.queue_waiting(T2, x(8), ts(2));
        table.queue_waiting(T3, x(8), ts(3));
        assert_eq!(table.pending(x(8)).unwrap().owner, T2);
        table.clear_waiting(T3, x(8));
        assert_eq!(table.pending(x(8)).unwrap().owner, T2);
        table.clear_waiting(T2, x(8));
        assert!(table.pending(x(8)).is_none());
    }

    #[test]
    fn test_granting_exclusive_clears_own_pending_entry() {
        let mut table = LockTable::new();
        assert!(table.acquire_exclusive(T1, x(8), ts(1)));
        table.queue_waiting(T2, x(8), ts(2));
        table.release_all(T1);
        assert!(table.acquire_exclusive(T2, x(8), ts(3)));
        assert!(table.pending(x(8)).is_none());
    }

    #[test]
    fn test_release_all_frees_every_variable() {
        let mut table = LockTable::new();
        assert!(table.acquire_shared(T1, x(1), ts(1)));
        assert!(table.acquire_exclusive(T1, x(2), ts(2)));
        assert!(table.acquire_shared(T2, x(1), ts(3)));
        table.queue_waiting(T1, x(3), ts(4));
        assert_eq!(table.held_by(T1), vec![
            (x(1), LockMode::Shared),
            (x(2), LockMode::Exclusive)
        ]);

        let released = table.release_all(T1);
        assert_eq!(released, vec![x(1), x(2)]);
        assert!(table.held_by(T1).is_empty());
        assert!(table.pending(x(3)).is_none());
        assert_eq!(table.state(x(2)), LockState::Unlocked);
        assert_eq!(table.state(x(1)).mode_of(T2), Some(LockMode::Shared));

        table.release_all(T2);
        assert!(table.is_empty());
    }
}
