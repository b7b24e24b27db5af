use clap::Command;
use miette::{IntoDiagnostic, Result};
use repcrec::Session;
use rustyline::error::ReadlineError;

use super::command::ShellCommand;
use super::editor::ShellEditor;
use crate::output::OutputFormat;

const PROLOGUE: &str = r#"Enter ":help" for usage hints."#;

pub struct ShellContext {
    pub session: Session,
    pub editor: ShellEditor,
    pub command: Command,
    pub should_quit: bool,
    pub format: OutputFormat,
}

impl ShellContext {
    pub fn run(mut self) -> Result<()> {
        println!("{}", PROLOGUE);
        while !self.should_quit {
            let prompt = format!("repcrec [{}]> ", self.session.tick());
            let result = match self.editor.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    } else if trimmed.starts_with(':') {
                        ShellCommand::execute_from_input(&mut self, trimmed)
                    } else {
                        self.execute_line(trimmed)
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => return Ok(()),
                Err(e) => return Err(e).into_diagnostic(),
            };
            // Handle recoverable errors.
            if let Err(e) = result {
                println!("{e:?}");
            }
        }
        Ok(())
    }

    fn execute_line(&mut self, line: &str) -> Result<()> {
        if let Some(result) = self.session.execute(line)? {
            println!("{}", self.format.render(&result)?);
        } else if self.session.is_closed() {
            println!("end of script, bye");
            self.should_quit = true;
        }
        Ok(())
    }
}
