//! Whole-state invariant checks, meant to run after every step of a randomized run.

use itertools::Itertools;
use repcrec_common::{SiteId, VariableId};
use repcrec_storage::LockState;
use repcrec_transaction::{TransactionManager, TxnState};

/// An invariant violation detected while checking the engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// What went wrong.
    pub description: String,
    /// Index of the operation after which it was detected.
    pub operation_index: usize,
    /// Additional context.
    pub context: String,
}

#[derive(Debug, Default)]
pub struct InvariantChecker {
    violations: Vec<InvariantViolation>,
}

impl InvariantChecker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            violations: Vec::new(),
        }
    }

    #[must_use]
    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    #[must_use]
    pub const fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn clear(&mut self) {
        self.violations.clear();
    }

    pub fn add_violation(&mut self, violation: InvariantViolation) {
        self.violations.push(violation);
    }

    /// Runs every check against the current state.
    pub fn check_all(&mut self, manager: &TransactionManager, operation_index: usize) {
        self.check_placement(manager, operation_index);
        self.check_site_history(manager, operation_index);
        self.check_version_order(manager, operation_index);
        self.check_lock_owners(manager, operation_index);
        self.check_no_deadlock(manager, operation_index);
    }

    /// Even variables live on every site, odd ones on their home site only.
    pub fn check_placement(&mut self, manager: &TransactionManager, operation_index: usize) {
        let data = manager.data();
        for variable in (1..=data.num_variables()).filter_map(VariableId::new) {
            let expected: Vec<SiteId> = (1..=data.num_sites())
                .filter_map(SiteId::new)
                .filter(|&site| variable.is_stored_at(site, data.num_sites()))
                .collect();
            match data.sites_for(variable) {
                Ok(actual) if actual == expected => {}
                actual => self.violations.push(InvariantViolation {
                    description: "Variable placed on the wrong sites".to_string(),
                    operation_index,
                    context: format!("{variable}: held at {actual:?}, expected {expected:?}"),
                }),
            }
        }
    }

    /// Failure times strictly increase, and a site is down exactly when its last failure has
    /// no matching recovery.
    pub fn check_site_history(&mut self, manager: &TransactionManager, operation_index: usize) {
        for site in manager.data().sites() {
            let failures = site.failure_times();
            if !failures.iter().tuple_windows().all(|(a, b)| a < b) {
                self.violations.push(InvariantViolation {
                    description: "Failure times not strictly increasing".to_string(),
                    operation_index,
                    context: format!("site {}: {failures:?}", site.id()),
                });
            }
            let down = failures.len() > site.recovery_times().len();
            if down == site.is_up() {
                self.violations.push(InvariantViolation {
                    description: "Site status disagrees with its history".to_string(),
                    operation_index,
                    context: format!(
                        "site {}: status {:?}, {} failures, {} recoveries",
                        site.id(),
                        site.status(),
                        failures.len(),
                        site.recovery_times().len()
                    ),
                });
            }
            if !site.is_up() && !site.lock_table().is_empty() {
                self.violations.push(InvariantViolation {
                    description: "Down site holds locks".to_string(),
                    operation_index,
                    context: format!("site {}", site.id()),
                });
            }
        }
    }

    /// Commit times within each version history strictly increase.
    pub fn check_version_order(&mut self, manager: &TransactionManager, operation_index: usize) {
        for site in manager.data().sites() {
            for variable in site.variables() {
                let Some(history) = site.history(variable) else {
                    continue;
                };
                let ordered = history
                    .iter()
                    .tuple_windows()
                    .all(|(a, b)| a.commit_ts < b.commit_ts);
                if !ordered {
                    self.violations.push(InvariantViolation {
                        description: "Version history out of commit order".to_string(),
                        operation_index,
                        context: format!("{variable} at site {}", site.id()),
                    });
                }
            }
        }
    }

    /// Every lock and pending request belongs to a running transaction that has not aborted.
    pub fn check_lock_owners(&mut self, manager: &TransactionManager, operation_index: usize) {
        for site in manager.data().sites() {
            for (variable, state, pending) in site.lock_table().iter() {
                let owners = state
                    .holders()
                    .into_iter()
                    .chain(pending)
                    .map(|lock| lock.owner);
                for owner in owners {
                    let live = manager.transaction(owner).is_some_and(|t| {
                        !t.is_read_only()
                            && matches!(t.state(), TxnState::Active | TxnState::Blocked)
                    });
                    if !live {
                        self.violations.push(InvariantViolation {
                            description: "Lock held by a finished or aborted transaction"
                                .to_string(),
                            operation_index,
                            context: format!("{owner} on {variable} at site {}", site.id()),
                        });
                    }
                }
                for holder in state.holders() {
                    let recorded = manager.transaction(holder.owner).is_some_and(|t| {
                        t.visited_sites().contains(&site.id())
                            && t.lock_holding_sites(variable)
                                .is_some_and(|sites| sites.contains(&site.id()))
                    });
                    if !recorded {
                        self.violations.push(InvariantViolation {
                            description: "Granted lock missing from its owner's bookkeeping"
                                .to_string(),
                            operation_index,
                            context: format!(
                                "{} on {variable} at site {}",
                                holder.owner,
                                site.id()
                            ),
                        });
                    }
                }
                if let LockState::Shared(holders) = state {
                    if holders.is_empty() {
                        self.violations.push(InvariantViolation {
                            description: "Shared lock without holders".to_string(),
                            operation_index,
                            context: format!("{variable} at site {}", site.id()),
                        });
                    }
                }
            }
        }
    }

    /// Deadlock detection leaves no cycle behind.
    pub fn check_no_deadlock(&mut self, manager: &TransactionManager, operation_index: usize) {
        if let Some(cycle) = manager.wait_graph().find_any_cycle() {
            self.violations.push(InvariantViolation {
                description: "Unresolved wait-for cycle".to_string(),
                operation_index,
                context: cycle.iter().join(" -> "),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use repcrec_common::Timestamp;

    use super::*;
    use crate::database::{Database, DatabaseConfig};

    #[test]
    fn test_fresh_database_is_consistent() {
        let db = Database::open_in_memory(&DatabaseConfig::default()).unwrap();
        let mut checker = InvariantChecker::new();
        checker.check_all(db.manager(), 0);
        assert!(!checker.has_violations(), "{:?}", checker.violations());
    }

    #[test]
    fn test_granted_locks_match_bookkeeping() {
        use repcrec_common::TxnId;
        use repcrec_transaction::TxnKind;

        let mut db = Database::open_in_memory(&DatabaseConfig::default()).unwrap();
        let x = |i| VariableId::new(i).unwrap();
        let tm = db.manager_mut();
        tm.begin(TxnId::new(1), TxnKind::ReadWrite, Timestamp::with_ts(1)).unwrap();
        tm.read(TxnId::new(1), x(2), Timestamp::with_ts(2)).unwrap();
        tm.write(TxnId::new(1), x(2), 5, Timestamp::with_ts(3)).unwrap();
        tm.write(TxnId::new(1), x(3), 7, Timestamp::with_ts(4)).unwrap();
        tm.fail(SiteId::new(4).unwrap(), Timestamp::with_ts(5)).unwrap();
        let mut checker = InvariantChecker::new();
        checker.check_all(db.manager(), 5);
        assert!(!checker.has_violations(), "{:?}", checker.violations());
    }

    #[test]
    fn test_failure_history_is_checked() {
        let mut db = Database::open_in_memory(&DatabaseConfig::default()).unwrap();
        let site = SiteId::new(4).unwrap();
        db.manager_mut().fail(site, Timestamp::with_ts(1)).unwrap();
        db.manager_mut().recover(site, Timestamp::with_ts(2)).unwrap();
        db.manager_mut().fail(site, Timestamp::with_ts(3)).unwrap();
        let mut checker = InvariantChecker::new();
        checker.check_all(db.manager(), 3);
        assert!(!checker.has_violations(), "{:?}", checker.violations());
    }
}
