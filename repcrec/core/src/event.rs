use std::fmt;

use itertools::Itertools;
use repcrec_common::{SiteId, Timestamp, TxnId, Value, VariableId};
use repcrec_storage::SiteStatus;
use repcrec_transaction::{AbortReason, CommittedWrite, Deadlock, ReadSource, TxnKind};
use serde::Serialize;

use crate::command::Command;

/// Something observable that happened while executing a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Began {
        txn: TxnId,
        kind: TxnKind,
    },
    Read {
        txn: TxnId,
        variable: VariableId,
        value: Value,
        source: ReadSource,
    },
    Wrote {
        txn: TxnId,
        variable: VariableId,
        value: Value,
        sites: Vec<SiteId>,
    },
    /// The command could not run and waits in the session queue.
    Blocked {
        command: Command,
        blocked_by: Option<TxnId>,
    },
    /// Held back behind earlier operations of the same transaction.
    Queued {
        command: Command,
    },
    Deadlock(Deadlock),
    Aborted {
        txn: TxnId,
        reason: AbortReason,
    },
    Committed {
        txn: TxnId,
        writes: Vec<CommittedWrite>,
    },
    SiteFailed {
        site: SiteId,
    },
    SiteRecovered {
        site: SiteId,
    },
    Dump {
        sites: Vec<SiteDump>,
    },
    /// A queued operation of a transaction that has been aborted since.
    Dropped {
        command: Command,
    },
    /// The command was refused and had no effect.
    Rejected {
        command: Command,
        reason: String,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Began {
                txn,
                kind: TxnKind::ReadWrite,
            } => write!(f, "{txn} begins"),
            Self::Began {
                txn,
                kind: TxnKind::ReadOnly,
            } => write!(f, "{txn} begins (read-only)"),
            Self::Read {
                txn,
                variable,
                value,
                source: ReadSource::Site(site),
            } => write!(f, "{txn} reads {variable} = {value} at site {site}"),
            Self::Read {
                txn,
                variable,
                value,
                source: ReadSource::OwnWrite,
            } => write!(f, "{txn} reads {variable} = {value} from its own write"),
            Self::Wrote {
                txn,
                variable,
                value,
                sites,
            } => write!(
                f,
                "{txn} writes {variable} = {value} at sites {}",
                sites.iter().join(",")
            ),
            Self::Blocked {
                command,
                blocked_by: Some(owner),
            } => write!(f, "{command} waits for {owner}"),
            Self::Blocked {
                command,
                blocked_by: None,
            } => write!(f, "{command} waits for a site to come up"),
            Self::Queued { command } => write!(
                f,
                "{command} queued behind earlier operations of {}",
                command.txn().map_or_else(String::new, |t| t.to_string())
            ),
            Self::Deadlock(deadlock) => write!(f, "{deadlock}"),
            Self::Aborted { txn, reason } => write!(f, "{txn} aborts: {reason}"),
            Self::Committed { txn, .. } => write!(f, "{txn} commits"),
            Self::SiteFailed { site } => write!(f, "site {site} fails"),
            Self::SiteRecovered { site } => write!(f, "site {site} recovers"),
            Self::Dump { sites } => write!(f, "{}", sites.iter().join("\n")),
            Self::Dropped { command } => write!(f, "{command} dropped: transaction aborted"),
            Self::Rejected { command, reason } => write!(f, "{command} rejected: {reason}"),
        }
    }
}

/// The committed values of one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteDump {
    pub site: SiteId,
    pub status: SiteStatus,
    pub values: Vec<(VariableId, Value)>,
}

impl fmt::Display for SiteDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "site {}", self.site)?;
        if self.status == SiteStatus::Down {
            write!(f, " (down)")?;
        }
        write!(
            f,
            " - {}",
            self.values
                .iter()
                .map(|(variable, value)| format!("{variable}: {value}"))
                .join(", ")
        )
    }
}

/// Everything one command produced, including the queued operations it unblocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub(crate) tick: Timestamp,
    pub(crate) command: Command,
    pub(crate) events: Vec<Event>,
}

impl QueryResult {
    #[inline]
    pub fn tick(&self) -> Timestamp {
        self.tick
    }

    #[inline]
    pub fn command(&self) -> &Command {
        &self.command
    }

    #[inline]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl IntoIterator for QueryResult {
    type IntoIter = std::vec::IntoIter<Event>;
    type Item = Event;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.events.iter().join("\n"))
    }
}
