mod command;
mod context;
mod editor;

use clap::Parser;
use command::build_command;
use context::ShellContext;
use editor::build_editor;
use miette::Result;
use repcrec::Database;

use crate::cli::DatabaseArgs;
use crate::output::OutputFormat;

/// Start an interactive shell on a fresh in-memory database.
#[derive(Debug, Parser, Clone)]
pub struct ShellArgs {
    /// Set output format.
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    #[command(flatten)]
    database: DatabaseArgs,
}

impl ShellArgs {
    pub fn run(self) -> Result<()> {
        let session = Database::open_in_memory(&self.database.into())?.session();
        let editor = build_editor()?;
        let command = build_command();
        let context = ShellContext {
            session,
            editor,
            command,
            should_quit: false,
            format: self.format,
        };
        context.run()
    }
}
