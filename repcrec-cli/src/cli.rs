use std::path::PathBuf;

use clap::{Args, Parser};
use miette::Result;
use repcrec::DatabaseConfig;
use repcrec::common::constants::{DEFAULT_NUM_SITES, DEFAULT_NUM_VARIABLES};

use crate::output::OutputFormat;
use crate::script_executor::ScriptExecutor;
use crate::shell::ShellArgs;

/// Replicated concurrency control and recovery simulator.
#[derive(Debug, Parser)]
#[command(name = "repcrec", version)]
pub enum Cli {
    Shell(ShellArgs),

    /// Run a script file and print what every command did.
    Execute {
        /// The script to run, one command per line.
        file: PathBuf,

        /// Set output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        #[command(flatten)]
        database: DatabaseArgs,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self {
            Cli::Shell(shell) => shell.run(),
            Cli::Execute {
                file,
                format,
                database,
            } => ScriptExecutor::new(database.into(), format).execute_file(file),
        }
    }
}

#[derive(Debug, Args, Clone, Copy)]
pub struct DatabaseArgs {
    /// Number of sites.
    #[arg(long, default_value_t = DEFAULT_NUM_SITES)]
    sites: u32,

    /// Number of variables.
    #[arg(long, default_value_t = DEFAULT_NUM_VARIABLES)]
    variables: u32,
}

impl From<DatabaseArgs> for DatabaseConfig {
    fn from(args: DatabaseArgs) -> Self {
        DatabaseConfig {
            num_sites: args.sites,
            num_variables: args.variables,
        }
    }
}
