//! The transaction manager: lifecycle, lock acquisition across replicas, and deadlock handling.
//!
//! Every operation carries the logical time at which the driver issues it. The manager checks
//! that time never goes backwards, routes the request to the sites holding the variable and
//! reports one of three things: the operation went through, it has to wait, or the
//! transaction was aborted.

use std::collections::{BTreeMap, BTreeSet};

use repcrec_common::{LogicalClock, SiteId, Timestamp, TxnId, Value, VariableId};
use repcrec_storage::{DataManager, LockMode};

use crate::error::{TransactionError, TransactionResult};
use crate::outcome::{
    CommittedWrite, Deadlock, EndResult, ReadResult, ReadSource, Wait, WriteResult,
};
use crate::transaction::{AbortReason, LockRequest, Transaction, TxnKind};
use crate::wait_graph::WaitGraph;

pub struct TransactionManager {
    clock: LogicalClock,
    data: DataManager,
    active: BTreeMap<TxnId, Transaction>,
    /// Committed and aborted transactions. Their ids cannot be reused.
    finished: BTreeMap<TxnId, Transaction>,
}

impl TransactionManager {
    pub fn new(data: DataManager) -> Self {
        Self {
            clock: LogicalClock::new(),
            data,
            active: BTreeMap::new(),
            finished: BTreeMap::new(),
        }
    }

    /// The latest time handed to the manager.
    #[inline]
    pub fn now(&self) -> Timestamp {
        self.clock.current()
    }

    #[inline]
    pub fn data(&self) -> &DataManager {
        &self.data
    }

    /// Looks up a transaction, running or finished.
    pub fn transaction(&self, id: TxnId) -> Option<&Transaction> {
        self.active.get(&id).or_else(|| self.finished.get(&id))
    }

    /// Transactions that have begun and not ended yet, aborted ones included.
    pub fn active_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.active.values()
    }

    pub fn finished_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.finished.values()
    }

    pub fn begin(&mut self, id: TxnId, kind: TxnKind, ts: Timestamp) -> TransactionResult<()> {
        if self.active.contains_key(&id) || self.finished.contains_key(&id) {
            return Err(TransactionError::DuplicateTransaction(id));
        }
        self.clock.advance_to(ts)?;
        self.active.insert(id, Transaction::new(id, kind, ts));
        tracing::info!(txn = %id, ?kind, %ts, "transaction began");
        Ok(())
    }

    pub fn read(
        &mut self,
        id: TxnId,
        variable: VariableId,
        ts: Timestamp,
    ) -> TransactionResult<ReadResult> {
        self.data.check_variable(variable)?;
        let read_only = self.runnable(id)?.is_read_only();
        self.clock.advance_to(ts)?;
        if read_only {
            self.snapshot_read(id, variable)
        } else {
            self.locked_read(id, variable, ts)
        }
    }

    pub fn write(
        &mut self,
        id: TxnId,
        variable: VariableId,
        value: Value,
        ts: Timestamp,
    ) -> TransactionResult<WriteResult> {
        self.data.check_variable(variable)?;
        if self.runnable(id)?.is_read_only() {
            return Err(TransactionError::ReadOnlyWrite(id));
        }
        self.clock.advance_to(ts)?;

        let request = LockRequest {
            variable,
            mode: LockMode::Exclusive,
        };
        let sites = self.data.up_sites_for(variable)?;
        if sites.is_empty() {
            return Ok(WriteResult::Blocked(self.wait_for_site(id, request)?));
        }

        // All or nothing: nothing is acquired unless every up copy can be locked.
        let mut owners = BTreeSet::new();
        let mut denied = Vec::new();
        for &site in &sites {
            let conflicts = self
                .data
                .site(site)?
                .conflicting_owners(id, variable, LockMode::Exclusive);
            if !conflicts.is_empty() {
                denied.push(site);
                owners.extend(conflicts);
            }
        }
        if !owners.is_empty() {
            for site in denied {
                self.data.site_mut(site)?.queue_waiting(id, variable, ts);
                self.txn_mut(id)?.visit(site);
            }
            return Ok(WriteResult::Blocked(self.deny(id, request, owners)?));
        }

        for &site in &sites {
            self.data.site_mut(site)?.acquire_exclusive(id, variable, ts)?;
        }
        let txn = self.txn_mut(id)?;
        for &site in &sites {
            txn.record_lock(variable, site);
            txn.record_access(site, ts);
        }
        txn.buffer_write(variable, value);
        txn.unblock();
        tracing::debug!(txn = %id, %variable, value, ?sites, "write buffered");
        Ok(WriteResult::Written { sites })
    }

    pub fn end(&mut self, id: TxnId, ts: Timestamp) -> TransactionResult<EndResult> {
        let txn = self.live(id)?;
        if txn.is_blocked() {
            return Err(TransactionError::TransactionBlocked(id));
        }
        let check_failures = !txn.is_read_only() && !txn.is_aborted();
        let accessed: Vec<(SiteId, Timestamp)> =
            txn.accessed_sites().iter().map(|(&s, &t)| (s, t)).collect();
        self.clock.advance_to(ts)?;

        if check_failures {
            for (site, since) in accessed {
                if self.data.failed_since(site, since)? {
                    self.abort(id, AbortReason::SiteFailure { site });
                    break;
                }
            }
        }

        if let Some(reason) = self.txn_mut(id)?.abort_reason() {
            self.release_locks(id);
            self.finish(id);
            tracing::info!(txn = %id, %reason, %ts, "transaction ended aborted");
            return Ok(EndResult::Aborted { reason });
        }

        let buffered: Vec<(VariableId, Value)> = self
            .txn_mut(id)?
            .writes()
            .iter()
            .map(|(&v, &value)| (v, value))
            .collect();
        // Validate every target before touching any history so a commit is never partial.
        let mut writes = Vec::with_capacity(buffered.len());
        for (variable, value) in buffered {
            let sites = self.data.up_sites_for(variable)?;
            for &site in &sites {
                self.data.site(site)?.check_write(variable, ts)?;
            }
            writes.push(CommittedWrite {
                variable,
                value,
                sites,
            });
        }
        for write in &writes {
            for &site in &write.sites {
                self.data.write(write.variable, write.value, site, ts)?;
            }
        }
        self.release_locks(id);
        self.txn_mut(id)?.commit();
        self.finish(id);
        tracing::info!(txn = %id, %ts, writes = writes.len(), "transaction committed");
        Ok(EndResult::Committed { at: ts, writes })
    }

    /// Fails a site. Returns the read-write transactions aborted because they read from it or
    /// hold a write lock there.
    pub fn fail(&mut self, site: SiteId, ts: Timestamp) -> TransactionResult<Vec<TxnId>> {
        self.data.site(site)?;
        self.clock.advance_to(ts)?;
        self.data.fail(site, ts)?;
        let victims: Vec<TxnId> = self
            .active
            .values()
            .filter(|t| !t.is_read_only() && !t.is_aborted())
            .filter(|t| t.accessed_sites().contains_key(&site))
            .map(Transaction::id)
            .collect();
        for &victim in &victims {
            self.abort(victim, AbortReason::SiteFailure { site });
        }
        Ok(victims)
    }

    pub fn recover(&mut self, site: SiteId, ts: Timestamp) -> TransactionResult<()> {
        self.data.site(site)?;
        self.clock.advance_to(ts)?;
        self.data.recover(site, ts)?;
        Ok(())
    }

    /// Latest committed values per site.
    pub fn dump(&self) -> Vec<(SiteId, Vec<(VariableId, Value)>)> {
        self.data.dump()
    }

    /// Rebuilds the waits-for graph from the lock tables of the up sites.
    pub fn wait_graph(&self) -> WaitGraph {
        let mut graph = WaitGraph::new();
        for txn in self
            .active
            .values()
            .filter(|t| t.is_blocked() && !t.is_read_only())
        {
            let Some(request) = txn.waiting_on() else {
                continue;
            };
            for site in self
                .data
                .sites()
                .filter(|s| s.is_up() && s.holds(request.variable))
            {
                for owner in site.conflicting_owners(txn.id(), request.variable, request.mode) {
                    if self.active.get(&owner).is_some_and(|t| !t.is_aborted()) {
                        graph.add_wait(txn.id(), owner);
                    }
                }
            }
        }
        graph
    }

    fn snapshot_read(&mut self, id: TxnId, variable: VariableId) -> TransactionResult<ReadResult> {
        let start_ts = self.txn_mut(id)?.start_ts();
        let found = if variable.is_replicated() {
            self.data.replicated_read(variable, start_ts)?
        } else {
            self.data.snapshot_read(variable, start_ts)?
        };
        match found {
            Some(found) => {
                let txn = self.txn_mut(id)?;
                txn.visit(found.site);
                txn.unblock();
                tracing::debug!(
                    txn = %id,
                    %variable,
                    site = %found.site,
                    value = found.version.value,
                    "snapshot read"
                );
                Ok(ReadResult::Value {
                    value: found.version.value,
                    source: ReadSource::Site(found.site),
                })
            }
            // The copy it needs is still readable once its site is back.
            None if self.data.available_on_down_site(variable, start_ts)? => {
                let request = LockRequest {
                    variable,
                    mode: LockMode::Shared,
                };
                Ok(ReadResult::Blocked(self.wait_for_site(id, request)?))
            }
            None => {
                self.abort(id, AbortReason::NoQualifiedValue { variable });
                Ok(ReadResult::NoQualifiedValue)
            }
        }
    }

    fn locked_read(
        &mut self,
        id: TxnId,
        variable: VariableId,
        ts: Timestamp,
    ) -> TransactionResult<ReadResult> {
        let request = LockRequest {
            variable,
            mode: LockMode::Shared,
        };
        let sites = self.data.up_sites_for(variable)?;
        if sites.is_empty() {
            return Ok(ReadResult::Blocked(self.wait_for_site(id, request)?));
        }

        let mut owners = BTreeSet::new();
        for &site in &sites {
            owners.extend(
                self.data
                    .site(site)?
                    .conflicting_owners(id, variable, LockMode::Shared),
            );
        }
        if !owners.is_empty() {
            return Ok(ReadResult::Blocked(self.deny(id, request, owners)?));
        }

        let (value, source) = match self.txn_mut(id)?.buffered(variable) {
            Some(value) => (value, ReadSource::OwnWrite),
            None => match self.data.current_read(variable)? {
                Some(found) => (found.version.value, ReadSource::Site(found.site)),
                // Every up copy is stale after a recovery.
                None => return Ok(ReadResult::Blocked(self.wait_for_site(id, request)?)),
            },
        };

        for &site in &sites {
            self.data.site_mut(site)?.acquire_shared(id, variable, ts)?;
        }
        let txn = self.txn_mut(id)?;
        for &site in &sites {
            txn.record_lock(variable, site);
        }
        if let ReadSource::Site(site) = source {
            txn.record_access(site, ts);
        }
        txn.unblock();
        tracing::debug!(txn = %id, %variable, value, ?source, "read");
        Ok(ReadResult::Value { value, source })
    }

    fn deny(
        &mut self,
        id: TxnId,
        request: LockRequest,
        owners: BTreeSet<TxnId>,
    ) -> TransactionResult<Wait> {
        let blocked_by = owners.first().copied();
        self.txn_mut(id)?.block(request, blocked_by);
        tracing::debug!(
            txn = %id,
            variable = %request.variable,
            mode = ?request.mode,
            ?owners,
            "lock denied"
        );
        let deadlocks = self.resolve_deadlocks(id);
        Ok(Wait {
            blocked_by,
            deadlocks,
        })
    }

    fn wait_for_site(&mut self, id: TxnId, request: LockRequest) -> TransactionResult<Wait> {
        self.txn_mut(id)?.block(request, None);
        tracing::debug!(txn = %id, variable = %request.variable, "no readable copy is up");
        Ok(Wait::default())
    }

    /// Aborts the youngest member of every cycle reachable from `start` until none is left.
    fn resolve_deadlocks(&mut self, start: TxnId) -> Vec<Deadlock> {
        let mut deadlocks = Vec::new();
        while let Some(cycle) = self.wait_graph().find_cycle_from(start) {
            let Some(deadlock) = self.break_cycle(cycle) else {
                break;
            };
            let victim = deadlock.victim;
            deadlocks.push(deadlock);
            if victim == start {
                break;
            }
        }
        deadlocks
    }

    fn break_cycle(&mut self, cycle: Vec<TxnId>) -> Option<Deadlock> {
        let victim = cycle
            .iter()
            .copied()
            .max_by_key(|t| self.active.get(t).map(Transaction::age_key))?;
        tracing::warn!(?cycle, %victim, "deadlock detected");
        self.abort(victim, AbortReason::Deadlock);
        Some(Deadlock { cycle, victim })
    }

    /// Marks `id` aborted and releases everything it holds right away.
    fn abort(&mut self, id: TxnId, reason: AbortReason) {
        if let Some(txn) = self.active.get_mut(&id) {
            txn.abort(reason);
        }
        self.release_locks(id);
        tracing::info!(txn = %id, %reason, "transaction aborted");
    }

    /// Releases the locks and pending requests of `id` at every site it visited.
    fn release_locks(&mut self, id: TxnId) {
        let visited: Vec<SiteId> = self
            .active
            .get(&id)
            .map(|t| t.visited_sites().iter().copied().collect())
            .unwrap_or_default();
        for site in visited {
            if let Err(err) = self.data.release_locks(site, id) {
                tracing::warn!(txn = %id, %site, %err, "failed to release locks");
            }
        }
    }

    fn finish(&mut self, id: TxnId) {
        if let Some(txn) = self.active.remove(&id) {
            self.finished.insert(id, txn);
        }
    }

    fn live(&self, id: TxnId) -> TransactionResult<&Transaction> {
        match self.active.get(&id) {
            Some(txn) => Ok(txn),
            None if self.finished.contains_key(&id) => {
                Err(TransactionError::TransactionFinished(id))
            }
            None => Err(TransactionError::UnknownTransaction(id)),
        }
    }

    /// A live transaction that may still issue reads and writes.
    fn runnable(&self, id: TxnId) -> TransactionResult<&Transaction> {
        let txn = self.live(id)?;
        if txn.is_aborted() {
            return Err(TransactionError::TransactionAborted(id));
        }
        Ok(txn)
    }

    fn txn_mut(&mut self, id: TxnId) -> TransactionResult<&mut Transaction> {
        self.active
            .get_mut(&id)
            .ok_or(TransactionError::UnknownTransaction(id))
    }
}

#[cfg(test)]
mod tests {
    use repcrec_storage::LockState;

    use super::*;
    use crate::transaction::TxnState;

    const T1: TxnId = TxnId::new(1);
    const T2: TxnId = TxnId::new(2);
    const T3: TxnId = TxnId::new(3);

    fn x(index: u32) -> VariableId {
        VariableId::new(index).unwrap()
    }

    fn site(id: u32) -> SiteId {
        SiteId::new(id).unwrap()
    }

    fn ts(tick: u64) -> Timestamp {
        Timestamp::with_ts(tick)
    }

    fn manager() -> TransactionManager {
        TransactionManager::new(DataManager::new(10, 20))
    }

    #[test]
    fn test_read_own_write() {
        let mut tm = manager();
        tm.begin(T1, TxnKind::ReadWrite, ts(1)).unwrap();
        tm.write(T1, x(3), 33, ts(2)).unwrap();
        assert_eq!(tm.read(T1, x(3), ts(3)).unwrap(), ReadResult::Value {
            value: 33,
            source: ReadSource::OwnWrite,
        });
        assert_eq!(tm.read(T1, x(4), ts(4)).unwrap(), ReadResult::Value {
            value: 40,
            source: ReadSource::Site(site(1)),
        });
    }

    #[test]
    fn test_reader_blocks_behind_writer() {
        let mut tm = manager();
        tm.begin(T1, TxnKind::ReadWrite, ts(1)).unwrap();
        tm.begin(T2, TxnKind::ReadWrite, ts(2)).unwrap();
        tm.write(T1, x(2), 5, ts(3)).unwrap();

        let ReadResult::Blocked(wait) = tm.read(T2, x(2), ts(4)).unwrap() else {
            panic!("read should block");
        };
        assert_eq!(wait.blocked_by, Some(T1));
        assert!(wait.deadlocks.is_empty());
        assert_eq!(tm.transaction(T2).unwrap().state(), TxnState::Blocked);

        tm.end(T1, ts(5)).unwrap();
        assert_eq!(tm.read(T2, x(2), ts(5)).unwrap(), ReadResult::Value {
            value: 5,
            source: ReadSource::Site(site(1)),
        });
        assert_eq!(tm.transaction(T2).unwrap().state(), TxnState::Active);
    }

    #[test]
    fn test_ending_blocked_transaction_is_rejected() {
        let mut tm = manager();
        tm.begin(T1, TxnKind::ReadWrite, ts(1)).unwrap();
        tm.begin(T2, TxnKind::ReadWrite, ts(2)).unwrap();
        tm.write(T1, x(1), 5, ts(3)).unwrap();
        tm.write(T2, x(1), 6, ts(4)).unwrap();
        assert_eq!(
            tm.end(T2, ts(5)),
            Err(TransactionError::TransactionBlocked(T2))
        );
    }

    #[test]
    fn test_usage_errors_leave_state_untouched() {
        let mut tm = manager();
        tm.begin(T1, TxnKind::ReadOnly, ts(1)).unwrap();
        assert_eq!(
            tm.begin(T1, TxnKind::ReadWrite, ts(2)),
            Err(TransactionError::DuplicateTransaction(T1))
        );
        assert_eq!(
            tm.write(T1, x(2), 1, ts(2)),
            Err(TransactionError::ReadOnlyWrite(T1))
        );
        assert_eq!(
            tm.read(T3, x(2), ts(2)),
            Err(TransactionError::UnknownTransaction(T3))
        );
        assert!(matches!(
            tm.read(T1, x(21), ts(2)),
            Err(TransactionError::Storage(_))
        ));
        assert!(matches!(
            tm.recover(site(1), ts(2)),
            Err(TransactionError::Storage(_))
        ));
        assert!(matches!(
            tm.begin(T2, TxnKind::ReadWrite, ts(0)),
            Err(TransactionError::Clock(_))
        ));
        tm.end(T1, ts(3)).unwrap();
        assert_eq!(
            tm.begin(T1, TxnKind::ReadWrite, ts(4)),
            Err(TransactionError::DuplicateTransaction(T1))
        );
        assert_eq!(
            tm.end(T1, ts(4)),
            Err(TransactionError::TransactionFinished(T1))
        );
    }

    #[test]
    fn test_write_is_all_or_nothing() {
        let mut tm = manager();
        tm.begin(T1, TxnKind::ReadWrite, ts(1)).unwrap();
        tm.begin(T2, TxnKind::ReadWrite, ts(2)).unwrap();
        tm.read(T1, x(2), ts(5)).unwrap();
        let WriteResult::Blocked(_) = tm.write(T2, x(2), 9, ts(6)).unwrap() else {
            panic!("write should block");
        };
        for s in tm.data().sites() {
            assert_eq!(s.lock_state(x(2)).mode_of(T2), None);
        }
    }

    #[test]
    fn test_victim_releases_locks_immediately() {
        let mut tm = manager();
        tm.begin(T1, TxnKind::ReadWrite, ts(1)).unwrap();
        tm.begin(T2, TxnKind::ReadWrite, ts(2)).unwrap();
        tm.write(T1, x(1), 1, ts(3)).unwrap();
        tm.write(T2, x(3), 3, ts(4)).unwrap();
        tm.write(T1, x(3), 1, ts(5)).unwrap();
        let WriteResult::Blocked(wait) = tm.write(T2, x(1), 3, ts(6)).unwrap() else {
            panic!("write should block");
        };
        assert_eq!(wait.deadlocks, vec![Deadlock {
            cycle: vec![T2, T1],
            victim: T2,
        }]);
        let t2 = tm.transaction(T2).unwrap();
        assert_eq!(t2.abort_reason(), Some(AbortReason::Deadlock));
        assert_eq!(
            tm.data().site(site(4)).unwrap().lock_state(x(3)),
            LockState::Unlocked
        );
        // Its queued request for x1 is gone too.
        assert_eq!(tm.data().site(site(2)).unwrap().pending_writer(x(1)), None);
        assert!(matches!(
            tm.write(T1, x(3), 1, ts(7)).unwrap(),
            WriteResult::Written { .. }
        ));
        assert_eq!(tm.end(T2, ts(8)).unwrap(), EndResult::Aborted {
            reason: AbortReason::Deadlock,
        });
    }
}
