//! Deterministic simulation: random command sequences run through a session, with the engine
//! invariants checked after every command.
//!
//! Besides the state invariants of [`InvariantChecker`], the simulator follows the event stream
//! and checks that every read returns a committed value (or the reader's own write), and that no
//! value written by an aborted transaction ever reaches a site.

use std::collections::{HashMap, HashSet};

use repcrec::common::{TxnId, Value, VariableId};
use repcrec::invariants::{InvariantChecker, InvariantViolation};
use repcrec::transaction::ReadSource;
use repcrec::{Command, Database, DatabaseConfig, Event, Session};

use crate::command_gen::{CommandGenConfig, CommandGenerator};

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    pub command_config: CommandGenConfig,
}

impl SimulatorConfig {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            command_config: CommandGenConfig::default(),
        }
    }

    #[must_use]
    pub fn with_command_config(mut self, config: CommandGenConfig) -> Self {
        self.command_config = config;
        self
    }

    /// Set the per-step probability of failing a site.
    #[must_use]
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.command_config.failure_rate = rate;
        self
    }
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    pub seed: u64,
    pub commands_processed: u64,
    pub commits: u64,
    pub aborts: u64,
    pub deadlocks: u64,
    /// Commands refused as usage errors, such as operations of an aborted transaction.
    pub rejections: u64,
    pub invariant_violations: Vec<InvariantViolation>,
    pub completed_successfully: bool,
    /// Error message if the session itself failed.
    pub error: Option<String>,
    /// Every command issued, for replaying a failing seed.
    pub commands: Vec<Command>,
}

impl SimulationResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.completed_successfully && self.invariant_violations.is_empty()
    }
}

pub struct Simulator {
    config: SimulatorConfig,
    generator: CommandGenerator,
    checker: InvariantChecker,
    /// Values known to be committed, per variable.
    committed: HashMap<VariableId, HashSet<Value>>,
    /// Writer of every value ever written.
    writers: HashMap<Value, TxnId>,
    aborted: HashSet<TxnId>,
    commands: Vec<Command>,
    commits: u64,
    aborts: u64,
    deadlocks: u64,
    rejections: u64,
}

impl Simulator {
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let generator = CommandGenerator::with_config(config.seed, config.command_config.clone());
        Self {
            config,
            generator,
            checker: InvariantChecker::new(),
            committed: HashMap::new(),
            writers: HashMap::new(),
            aborted: HashSet::new(),
            commands: Vec::new(),
            commits: 0,
            aborts: 0,
            deadlocks: 0,
            rejections: 0,
        }
    }

    /// Runs `command_count` commands against a fresh database.
    pub fn run(&mut self, command_count: usize) -> SimulationResult {
        let db_config = DatabaseConfig {
            num_sites: self.config.command_config.num_sites,
            num_variables: self.config.command_config.num_variables,
        };
        let mut session = match Database::open_in_memory(&db_config) {
            Ok(db) => db.session(),
            Err(e) => return self.result(false, Some(format!("failed to open database: {e}"))),
        };

        for index in 0..command_count {
            let command = self.generator.next_command();
            self.commands.push(command);
            let result = match session.run(command) {
                Ok(result) => result,
                Err(e) => return self.result(false, Some(format!("{command}: {e}"))),
            };
            for event in result.events() {
                self.observe(event, index);
            }
            self.checker.check_all(session.manager(), index);
        }
        self.check_abort_totality(&session, command_count);
        self.result(true, None)
    }

    #[must_use]
    pub fn checker(&self) -> &InvariantChecker {
        &self.checker
    }

    fn observe(&mut self, event: &Event, index: usize) {
        match event {
            Event::Read {
                txn,
                variable,
                value,
                source: ReadSource::Site(site),
            } => {
                let committed = *value == variable.initial_value()
                    || self
                        .committed
                        .get(variable)
                        .is_some_and(|values| values.contains(value));
                if !committed {
                    self.violation(
                        "Read a value that was never committed",
                        index,
                        format!("{txn} read {variable} = {value} at site {site}"),
                    );
                }
            }
            Event::Read {
                txn,
                variable,
                value,
                source: ReadSource::OwnWrite,
            } => {
                if self.writers.get(value) != Some(txn) {
                    self.violation(
                        "Own-write read returned another transaction's value",
                        index,
                        format!("{txn} read {variable} = {value}"),
                    );
                }
            }
            Event::Wrote { txn, value, .. } => {
                self.writers.insert(*value, *txn);
            }
            Event::Committed { writes, .. } => {
                self.commits += 1;
                for write in writes {
                    self.committed
                        .entry(write.variable)
                        .or_default()
                        .insert(write.value);
                }
            }
            Event::Aborted { txn, .. } => {
                // A transaction aborted in flight reports again at `end`.
                if self.aborted.insert(*txn) {
                    self.aborts += 1;
                }
            }
            Event::Deadlock(_) => self.deadlocks += 1,
            Event::Rejected { .. } => self.rejections += 1,
            _ => {}
        }
    }

    /// No site holds a version written by an aborted transaction.
    fn check_abort_totality(&mut self, session: &Session, index: usize) {
        let mut leaked = Vec::new();
        for site in session.manager().data().sites() {
            for variable in site.variables() {
                let Some(history) = site.history(variable) else {
                    continue;
                };
                for version in history.iter() {
                    if let Some(writer) = self.writers.get(&version.value) {
                        if self.aborted.contains(writer) {
                            leaked.push(format!(
                                "{writer} wrote {variable} = {} at site {}",
                                version.value,
                                site.id()
                            ));
                        }
                    }
                }
            }
        }
        for context in leaked {
            self.violation("Aborted write reached a site", index, context);
        }
    }

    fn violation(&mut self, description: &str, operation_index: usize, context: String) {
        self.checker.add_violation(InvariantViolation {
            description: description.to_string(),
            operation_index,
            context,
        });
    }

    fn result(&self, completed_successfully: bool, error: Option<String>) -> SimulationResult {
        SimulationResult {
            seed: self.config.seed,
            commands_processed: self.commands.len() as u64,
            commits: self.commits,
            aborts: self.aborts,
            deadlocks: self.deadlocks,
            rejections: self.rejections,
            invariant_violations: self.checker.violations().to_vec(),
            completed_successfully,
            error,
            commands: self.commands.clone(),
        }
    }
}
