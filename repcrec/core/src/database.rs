use repcrec_common::constants::{DEFAULT_NUM_SITES, DEFAULT_NUM_VARIABLES};
use repcrec_storage::DataManager;
use repcrec_transaction::TransactionManager;

use crate::error::{Error, Result};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub num_sites: u32,
    pub num_variables: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            num_sites: DEFAULT_NUM_SITES,
            num_variables: DEFAULT_NUM_VARIABLES,
        }
    }
}

impl DatabaseConfig {
    fn validate(&self) -> Result<()> {
        if self.num_sites == 0 {
            return Err(Error::InvalidConfig("no sites".into()));
        }
        if self.num_variables == 0 {
            return Err(Error::InvalidConfig("no variables".into()));
        }
        Ok(())
    }
}

/// An in-memory replicated store: every site, its data and the transaction manager driving them.
pub struct Database {
    config: DatabaseConfig,
    manager: TransactionManager,
}

impl Database {
    pub fn open_in_memory(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let data = DataManager::new(config.num_sites, config.num_variables);
        tracing::debug!(
            num_sites = config.num_sites,
            num_variables = config.num_variables,
            "database opened"
        );
        Ok(Self {
            config: config.clone(),
            manager: TransactionManager::new(data),
        })
    }

    #[inline]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The engine itself, for callers that drive time on their own.
    #[inline]
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    #[inline]
    pub fn manager_mut(&mut self) -> &mut TransactionManager {
        &mut self.manager
    }

    /// Turns the database into a session that reads commands and keeps the clock itself.
    pub fn session(self) -> Session {
        Session::new(self)
    }
}
