//! A single site: its copies of the variables, its lock table and its failure history.

use std::collections::{BTreeMap, BTreeSet};

use repcrec_common::{SiteId, Timestamp, TxnId, Value, VariableId};
use serde::Serialize;

use crate::error::{StorageError, StorageResult};
use crate::lock::{Lock, LockMode, LockState, LockTable};
use crate::version::{Version, VersionHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Up,
    Down,
}

pub struct Site {
    id: SiteId,
    status: SiteStatus,
    failure_times: Vec<Timestamp>,
    recovery_times: Vec<Timestamp>,
    versions: BTreeMap<VariableId, VersionHistory>,
    locks: LockTable,
    /// Replicated variables that have not been written since the last recovery.
    stale: BTreeSet<VariableId>,
}

impl Site {
    /// Creates a site holding the initial version of every variable placed on it.
    pub fn new(id: SiteId, num_sites: u32, num_variables: u32) -> Self {
        let versions = (1..=num_variables)
            .filter_map(VariableId::new)
            .filter(|v| v.is_stored_at(id, num_sites))
            .map(|v| (v, VersionHistory::new(Version::initial(v))))
            .collect();
        Self {
            id,
            status: SiteStatus::Up,
            failure_times: Vec::new(),
            recovery_times: Vec::new(),
            versions,
            locks: LockTable::new(),
            stale: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> SiteId {
        self.id
    }

    #[inline]
    pub fn status(&self) -> SiteStatus {
        self.status
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.status == SiteStatus::Up
    }

    pub fn failure_times(&self) -> &[Timestamp] {
        &self.failure_times
    }

    pub fn recovery_times(&self) -> &[Timestamp] {
        &self.recovery_times
    }

    pub fn holds(&self, variable: VariableId) -> bool {
        self.versions.contains_key(&variable)
    }

    pub fn variables(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.versions.keys().copied()
    }

    pub fn history(&self, variable: VariableId) -> Option<&VersionHistory> {
        self.versions.get(&variable)
    }

    /// The version of `variable` visible at `ts`, scanning the history backwards.
    pub fn read_at(&self, variable: VariableId, ts: Timestamp) -> Option<&Version> {
        self.versions.get(&variable).and_then(|h| h.at(ts))
    }

    pub fn latest(&self, variable: VariableId) -> Option<&Version> {
        self.versions.get(&variable).and_then(|h| h.latest())
    }

    /// Whether a read-write transaction may read the current copy of `variable` here.
    pub fn is_readable(&self, variable: VariableId) -> bool {
        self.is_up() && self.holds(variable) && !self.stale.contains(&variable)
    }

    pub fn can_acquire_shared(&self, txn: TxnId, variable: VariableId) -> bool {
        self.locks.can_acquire_shared(txn, variable)
    }

    pub fn can_acquire_exclusive(&self, txn: TxnId, variable: VariableId) -> bool {
        self.locks.can_acquire_exclusive(txn, variable)
    }

    pub fn acquire_shared(
        &mut self,
        txn: TxnId,
        variable: VariableId,
        ts: Timestamp,
    ) -> StorageResult<()> {
        self.ensure_lockable(variable)?;
        if self.locks.acquire_shared(txn, variable, ts) {
            tracing::debug!(site = %self.id, %txn, %variable, %ts, "shared lock granted");
            Ok(())
        } else {
            Err(self.conflict(txn, variable, LockMode::Shared))
        }
    }

    pub fn acquire_exclusive(
        &mut self,
        txn: TxnId,
        variable: VariableId,
        ts: Timestamp,
    ) -> StorageResult<()> {
        self.ensure_lockable(variable)?;
        if self.locks.acquire_exclusive(txn, variable, ts) {
            tracing::debug!(site = %self.id, %txn, %variable, %ts, "exclusive lock granted");
            Ok(())
        } else {
            Err(self.conflict(txn, variable, LockMode::Exclusive))
        }
    }

    pub fn queue_waiting(&mut self, txn: TxnId, variable: VariableId, ts: Timestamp) {
        self.locks.queue_waiting(txn, variable, ts);
    }

    pub fn clear_waiting(&mut self, txn: TxnId, variable: VariableId) {
        self.locks.clear_waiting(txn, variable);
    }

    pub fn pending_writer(&self, variable: VariableId) -> Option<Lock> {
        self.locks.pending(variable)
    }

    pub fn lock_state(&self, variable: VariableId) -> LockState {
        self.locks.state(variable)
    }

    pub fn lock_table(&self) -> &LockTable {
        &self.locks
    }

    /// One transaction holding a lock that conflicts with `txn` reading `variable`.
    pub fn conflicting_owner(&self, txn: TxnId, variable: VariableId) -> Option<TxnId> {
        self.conflicting_owners(txn, variable, LockMode::Shared)
            .into_iter()
            .next()
    }

    pub fn conflicting_owners(
        &self,
        txn: TxnId,
        variable: VariableId,
        mode: LockMode,
    ) -> BTreeSet<TxnId> {
        self.locks.conflicting_owners(txn, variable, mode)
    }

    pub fn release_all(&mut self, txn: TxnId) {
        let released = self.locks.release_all(txn);
        if !released.is_empty() {
            tracing::debug!(site = %self.id, %txn, ?released, "locks released");
        }
    }

    /// Checks that a version of `variable` committed at `ts` can be appended.
    pub fn check_write(&self, variable: VariableId, ts: Timestamp) -> StorageResult<()> {
        let history = self
            .versions
            .get(&variable)
            .ok_or(StorageError::NotStoredAt {
                variable,
                site: self.id,
            })?;
        history
            .accepts(ts)
            .map_err(|last| StorageError::NonMonotonicCommit {
                variable,
                site: self.id,
                last,
                given: ts,
            })
    }

    /// Appends a committed version. Lock ownership is the caller's responsibility.
    pub fn write(
        &mut self,
        variable: VariableId,
        value: Value,
        ts: Timestamp,
    ) -> StorageResult<()> {
        self.check_write(variable, ts)?;
        if let Some(history) = self.versions.get_mut(&variable) {
            history.push(Version::new(variable, value, ts));
        }
        self.stale.remove(&variable);
        Ok(())
    }

    /// Marks the site down and forgets every lock. Versions are kept.
    pub fn fail(&mut self, ts: Timestamp) {
        self.locks.clear();
        self.status = SiteStatus::Down;
        self.failure_times.push(ts);
    }

    /// Marks the site up. Replicated copies stay unreadable until a new write commits here.
    pub fn recover(&mut self, ts: Timestamp) {
        self.status = SiteStatus::Up;
        self.recovery_times.push(ts);
        self.stale = self
            .versions
            .keys()
            .copied()
            .filter(VariableId::is_replicated)
            .collect();
    }

    /// Latest committed value of every variable held here.
    pub fn dump(&self) -> Vec<(VariableId, Value)> {
        self.versions
            .iter()
            .filter_map(|(&v, h)| h.latest().map(|version| (v, version.value)))
            .collect()
    }

    fn ensure_lockable(&self, variable: VariableId) -> StorageResult<()> {
        if !self.is_up() {
            return Err(StorageError::SiteDown(self.id));
        }
        if !self.holds(variable) {
            return Err(StorageError::NotStoredAt {
                variable,
                site: self.id,
            });
        }
        Ok(())
    }

    fn conflict(&self, txn: TxnId, variable: VariableId, mode: LockMode) -> StorageError {
        StorageError::LockConflict {
            txn,
            variable,
            site: self.id,
            holders: self
                .conflicting_owners(txn, variable, mode)
                .into_iter()
                .collect(),
        }
    }
}
