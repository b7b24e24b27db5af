//! Seeded generator of command sequences.
//!
//! The generator keeps a rough model of the session (which transactions it began and has not
//! ended, which sites it failed) so that most commands are meaningful. It never tries to predict
//! blocking or aborts; those are left to the engine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use repcrec::Command;
use repcrec::common::constants::{DEFAULT_NUM_SITES, DEFAULT_NUM_VARIABLES};
use repcrec::common::{SiteId, TxnId, Value, VariableId};

/// Written values start here so they can never be mistaken for initial values.
pub const FIRST_WRITTEN_VALUE: Value = 1_000_000;

/// Configuration for command generation.
#[derive(Debug, Clone)]
pub struct CommandGenConfig {
    pub num_sites: u32,
    pub num_variables: u32,
    /// Upper bound on transactions begun and not yet ended.
    pub max_live_transactions: usize,
    /// Probability that a new transaction is read-only.
    pub read_only_rate: f64,
    /// Probability of failing a site on any step.
    pub failure_rate: f64,
    /// Probability of recovering a site on any step, when one is down.
    pub recovery_rate: f64,
    /// Probability of beginning a transaction when below the limit.
    pub begin_rate: f64,
    /// Probability that a transaction operation is `end`.
    pub end_rate: f64,
    /// Probability that a read-write operation is a write rather than a read.
    pub write_rate: f64,
    /// Probability of a `dump()`.
    pub dump_rate: f64,
}

impl Default for CommandGenConfig {
    fn default() -> Self {
        Self {
            num_sites: DEFAULT_NUM_SITES,
            num_variables: DEFAULT_NUM_VARIABLES,
            max_live_transactions: 4,
            read_only_rate: 0.2,
            failure_rate: 0.03,
            recovery_rate: 0.1,
            begin_rate: 0.3,
            end_rate: 0.15,
            write_rate: 0.5,
            dump_rate: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveTxn {
    id: TxnId,
    read_only: bool,
}

/// Generator for reproducible command sequences.
pub struct CommandGenerator {
    rng: StdRng,
    config: CommandGenConfig,
    next_txn: u32,
    live: Vec<LiveTxn>,
    down: Vec<SiteId>,
    next_value: Value,
}

impl CommandGenerator {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, CommandGenConfig::default())
    }

    #[must_use]
    pub fn with_config(seed: u64, config: CommandGenConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            config,
            next_txn: 1,
            live: Vec::new(),
            down: Vec::new(),
            next_value: FIRST_WRITTEN_VALUE,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CommandGenConfig {
        &self.config
    }

    pub fn next_command(&mut self) -> Command {
        if let Some(command) = self.next_site_event() {
            return command;
        }
        if self.rng.random_bool(self.config.dump_rate) {
            return Command::Dump;
        }
        let can_begin = self.live.len() < self.config.max_live_transactions;
        if self.live.is_empty() || (can_begin && self.rng.random_bool(self.config.begin_rate)) {
            return self.begin();
        }

        let index = self.rng.random_range(0..self.live.len());
        let txn = self.live[index];
        if self.rng.random_bool(self.config.end_rate) {
            self.live.swap_remove(index);
            return Command::End { txn: txn.id };
        }
        let variable = self.random_variable();
        if !txn.read_only && self.rng.random_bool(self.config.write_rate) {
            let value = self.next_value;
            self.next_value += 1;
            Command::Write {
                txn: txn.id,
                variable,
                value,
            }
        } else {
            Command::Read {
                txn: txn.id,
                variable,
            }
        }
    }

    fn next_site_event(&mut self) -> Option<Command> {
        let roll: f64 = self.rng.random();
        if roll < self.config.failure_rate {
            let up: Vec<SiteId> = (1..=self.config.num_sites)
                .filter_map(SiteId::new)
                .filter(|site| !self.down.contains(site))
                .collect();
            if !up.is_empty() {
                let site = up[self.rng.random_range(0..up.len())];
                self.down.push(site);
                return Some(Command::Fail { site });
            }
        } else if roll < self.config.failure_rate + self.config.recovery_rate
            && !self.down.is_empty()
        {
            let index = self.rng.random_range(0..self.down.len());
            let site = self.down.swap_remove(index);
            return Some(Command::Recover { site });
        }
        None
    }

    fn begin(&mut self) -> Command {
        let id = TxnId::new(self.next_txn);
        self.next_txn += 1;
        let read_only = self.rng.random_bool(self.config.read_only_rate);
        self.live.push(LiveTxn { id, read_only });
        if read_only {
            Command::BeginReadOnly { txn: id }
        } else {
            Command::Begin { txn: id }
        }
    }

    fn random_variable(&mut self) -> VariableId {
        let index = self.rng.random_range(1..=self.config.num_variables);
        VariableId::new(index).unwrap_or_else(|| unreachable!("variable indices start at 1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let mut a = CommandGenerator::new(42);
        let mut b = CommandGenerator::new(42);
        for _ in 0..200 {
            assert_eq!(a.next_command(), b.next_command());
        }
    }

    #[test]
    fn test_first_command_begins() {
        let config = CommandGenConfig {
            failure_rate: 0.0,
            dump_rate: 0.0,
            ..Default::default()
        };
        let mut generator = CommandGenerator::with_config(7, config);
        assert!(matches!(
            generator.next_command(),
            Command::Begin { .. } | Command::BeginReadOnly { .. }
        ));
    }

    #[test]
    fn test_written_values_are_unique() {
        let mut generator = CommandGenerator::new(3);
        let mut values = Vec::new();
        for _ in 0..500 {
            if let Command::Write { value, .. } = generator.next_command() {
                values.push(value);
            }
        }
        assert!(!values.is_empty());
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert!(values[0] >= FIRST_WRITTEN_VALUE);
    }

    #[test]
    fn test_site_events_are_consistent() {
        let config = CommandGenConfig {
            failure_rate: 0.3,
            recovery_rate: 0.3,
            ..Default::default()
        };
        let mut generator = CommandGenerator::with_config(11, config);
        let mut down = Vec::new();
        for _ in 0..500 {
            match generator.next_command() {
                Command::Fail { site } => {
                    assert!(!down.contains(&site), "{site} failed twice");
                    down.push(site);
                }
                Command::Recover { site } => {
                    let index = down.iter().position(|&s| s == site).unwrap();
                    down.swap_remove(index);
                }
                _ => {}
            }
        }
    }
}
