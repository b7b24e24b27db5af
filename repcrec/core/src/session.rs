//! Command-driven execution on top of the transaction manager.
//!
//! A session owns the logical clock: each command takes the next tick, starting at 1. Commands
//! that cannot run yet are kept in a FIFO queue, and after every command the queue gets one
//! retry pass at the same tick. Operations of a transaction always run in the order they were
//! issued, and a transaction makes at most one step per tick.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use itertools::Itertools;
use repcrec_common::{SiteId, Timestamp, TxnId};
use repcrec_storage::SiteStatus;
use repcrec_transaction::{
    AbortReason, EndResult, ReadResult, TransactionManager, TransactionResult, TxnKind, TxnState,
    Wait, WriteResult,
};
use serde::Serialize;

use crate::command::{Command, Statement, parse_line, parse_script};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::event::{Event, QueryResult, SiteDump};

pub struct Session {
    database: Database,
    /// The tick the next command runs at.
    tick: Timestamp,
    pending: VecDeque<Command>,
    closed: bool,
}

enum Step {
    Done,
    Blocked(Wait),
}

impl Session {
    pub(crate) fn new(database: Database) -> Self {
        Self {
            database,
            tick: Timestamp::with_ts(1),
            pending: VecDeque::new(),
            closed: false,
        }
    }

    #[inline]
    pub fn manager(&self) -> &TransactionManager {
        self.database.manager()
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The tick the next command will run at.
    #[inline]
    pub fn tick(&self) -> Timestamp {
        self.tick
    }

    /// Operations waiting to be retried, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &Command> {
        self.pending.iter()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Runs one line. Blank and comment lines produce no result; a `===` line closes the
    /// session.
    pub fn execute(&mut self, line: &str) -> Result<Option<QueryResult>> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        match parse_line(line)? {
            Statement::Command(command) => self.run(command).map(Some),
            Statement::Empty => Ok(None),
            Statement::EndOfScript => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    /// Parses the whole script before running any of it.
    pub fn execute_script(&mut self, script: &str) -> Result<Vec<QueryResult>> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        let mut results = Vec::new();
        for statement in parse_script(script)? {
            match statement {
                Statement::Command(command) => results.push(self.run(command)?),
                Statement::Empty => {}
                Statement::EndOfScript => self.closed = true,
            }
        }
        Ok(results)
    }

    pub fn run(&mut self, command: Command) -> Result<QueryResult> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        let ts = self.tick;
        self.tick = ts.next()?;
        let mut events = Vec::new();

        let queued_behind = command
            .txn()
            .filter(|_| command.is_ordered())
            .is_some_and(|txn| self.has_pending(txn));
        if queued_behind {
            tracing::debug!(%command, %ts, "queued behind earlier operations");
            events.push(Event::Queued { command });
            self.pending.push_back(command);
        } else {
            match self.apply(command, ts, &mut events) {
                Ok(Step::Done) => {}
                Ok(Step::Blocked(wait)) => {
                    events.push(Event::Blocked {
                        command,
                        blocked_by: wait.blocked_by,
                    });
                    report_deadlocks(wait, &mut events);
                    self.pending.push_back(command);
                }
                Err(err) => {
                    tracing::debug!(%command, %err, "command rejected");
                    events.push(Event::Rejected {
                        command,
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.retry_pending(command.txn(), ts, &mut events);
        Ok(QueryResult {
            tick: ts,
            command,
            events,
        })
    }

    pub fn status(&self) -> SessionStatus {
        let manager = self.manager();
        SessionStatus {
            tick: self.tick,
            sites: manager
                .data()
                .sites()
                .map(|site| (site.id(), site.status()))
                .collect(),
            transactions: manager
                .active_transactions()
                .chain(manager.finished_transactions())
                .map(|txn| TransactionStatus {
                    txn: txn.id(),
                    kind: txn.kind(),
                    state: txn.state(),
                    start_ts: txn.start_ts(),
                })
                .sorted_by_key(|t| t.txn)
                .collect(),
            pending: self.pending.iter().copied().collect(),
        }
    }

    /// One FIFO pass over the queue. `current` is the transaction that already used this tick.
    fn retry_pending(&mut self, current: Option<TxnId>, ts: Timestamp, events: &mut Vec<Event>) {
        let mut stepped: BTreeSet<TxnId> = current.into_iter().collect();
        for command in std::mem::take(&mut self.pending) {
            let Some(txn) = command.txn() else {
                continue;
            };
            if self.is_dropped(&command, txn) {
                events.push(Event::Dropped { command });
                continue;
            }
            // Keeps both program order and the one-step-per-tick rule.
            if !stepped.insert(txn) {
                self.pending.push_back(command);
                continue;
            }
            match self.apply(command, ts, events) {
                Ok(Step::Done) => {}
                Ok(Step::Blocked(wait)) => {
                    report_deadlocks(wait, events);
                    self.pending.push_back(command);
                }
                Err(err) => events.push(Event::Rejected {
                    command,
                    reason: err.to_string(),
                }),
            }
        }

        // Victims chosen during the pass may have operations further up the queue.
        let pending = std::mem::take(&mut self.pending);
        for command in pending {
            match command.txn() {
                Some(txn) if self.is_dropped(&command, txn) => {
                    events.push(Event::Dropped { command });
                }
                _ => self.pending.push_back(command),
            }
        }
    }

    fn apply(
        &mut self,
        command: Command,
        ts: Timestamp,
        events: &mut Vec<Event>,
    ) -> TransactionResult<Step> {
        let manager = self.database.manager_mut();
        match command {
            Command::Begin { txn } => {
                manager.begin(txn, TxnKind::ReadWrite, ts)?;
                events.push(Event::Began {
                    txn,
                    kind: TxnKind::ReadWrite,
                });
            }
            Command::BeginReadOnly { txn } => {
                manager.begin(txn, TxnKind::ReadOnly, ts)?;
                events.push(Event::Began {
                    txn,
                    kind: TxnKind::ReadOnly,
                });
            }
            Command::Read { txn, variable } => match manager.read(txn, variable, ts)? {
                ReadResult::Value { value, source } => events.push(Event::Read {
                    txn,
                    variable,
                    value,
                    source,
                }),
                ReadResult::NoQualifiedValue => events.push(Event::Aborted {
                    txn,
                    reason: AbortReason::NoQualifiedValue { variable },
                }),
                ReadResult::Blocked(wait) => return Ok(Step::Blocked(wait)),
            },
            Command::Write {
                txn,
                variable,
                value,
            } => match manager.write(txn, variable, value, ts)? {
                WriteResult::Written { sites } => events.push(Event::Wrote {
                    txn,
                    variable,
                    value,
                    sites,
                }),
                WriteResult::Blocked(wait) => return Ok(Step::Blocked(wait)),
            },
            Command::End { txn } => match manager.end(txn, ts)? {
                EndResult::Committed { writes, .. } => {
                    events.push(Event::Committed { txn, writes });
                }
                EndResult::Aborted { reason } => events.push(Event::Aborted { txn, reason }),
            },
            Command::Fail { site } => {
                let victims = manager.fail(site, ts)?;
                events.push(Event::SiteFailed { site });
                events.extend(victims.into_iter().map(|txn| Event::Aborted {
                    txn,
                    reason: AbortReason::SiteFailure { site },
                }));
            }
            Command::Recover { site } => {
                manager.recover(site, ts)?;
                events.push(Event::SiteRecovered { site });
            }
            Command::Dump => events.push(self.dump()),
        }
        Ok(Step::Done)
    }

    fn dump(&self) -> Event {
        let sites = self
            .manager()
            .data()
            .sites()
            .map(|site| SiteDump {
                site: site.id(),
                status: site.status(),
                values: site.dump(),
            })
            .collect();
        Event::Dump { sites }
    }

    fn has_pending(&self, txn: TxnId) -> bool {
        self.pending.iter().any(|c| c.txn() == Some(txn))
    }

    /// Reads and writes of an aborted transaction are discarded; its `end` still runs.
    fn is_dropped(&self, command: &Command, txn: TxnId) -> bool {
        matches!(command, Command::Read { .. } | Command::Write { .. })
            && self.manager().transaction(txn).is_some_and(|t| t.is_aborted())
    }
}

fn report_deadlocks(wait: Wait, events: &mut Vec<Event>) {
    for deadlock in wait.deadlocks {
        let victim = deadlock.victim;
        events.push(Event::Deadlock(deadlock));
        events.push(Event::Aborted {
            txn: victim,
            reason: AbortReason::Deadlock,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionStatus {
    pub txn: TxnId,
    pub kind: TxnKind,
    pub state: TxnState,
    pub start_ts: Timestamp,
}

/// A snapshot of the session for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub tick: Timestamp,
    pub sites: Vec<(SiteId, SiteStatus)>,
    pub transactions: Vec<TransactionStatus>,
    pub pending: Vec<Command>,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "next tick: {}", self.tick)?;
        let down = self
            .sites
            .iter()
            .filter(|(_, status)| *status == SiteStatus::Down)
            .map(|(site, _)| site)
            .join(", ");
        if down.is_empty() {
            writeln!(f, "sites down: none")?;
        } else {
            writeln!(f, "sites down: {down}")?;
        }
        for txn in &self.transactions {
            let kind = match txn.kind {
                TxnKind::ReadWrite => "read-write",
                TxnKind::ReadOnly => "read-only",
            };
            writeln!(
                f,
                "{} ({kind}, started at {}): {}",
                txn.txn, txn.start_ts, txn.state
            )?;
        }
        write!(f, "pending: ")?;
        if self.pending.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.pending.iter().join(", "))
        }
    }
}
