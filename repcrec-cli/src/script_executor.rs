use std::path::Path;

use miette::{IntoDiagnostic, Result, WrapErr};
use repcrec::{Database, DatabaseConfig};

use crate::output::OutputFormat;

#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    config: DatabaseConfig,
    format: OutputFormat,
}

impl ScriptExecutor {
    pub fn new(config: DatabaseConfig, format: OutputFormat) -> Self {
        Self { config, format }
    }

    /// Runs the whole file in a fresh session. A syntax error anywhere stops the run before the
    /// first command.
    pub fn execute_file(&self, file: impl AsRef<Path>) -> Result<()> {
        let file = file.as_ref();
        let script = std::fs::read_to_string(file)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read {}", file.display()))?;
        tracing::debug!(file = %file.display(), "executing script");
        let mut session = Database::open_in_memory(&self.config)?.session();
        for result in session.execute_script(&script)? {
            println!("{}", self.format.render(&result)?);
        }
        Ok(())
    }
}
