use clap::ValueEnum;
use miette::{IntoDiagnostic, Result};
use repcrec::QueryResult;
use strum::Display;

#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    /// One line per event.
    Text,
    /// One JSON object per command.
    Json,
}

impl OutputFormat {
    pub fn render(self, result: &QueryResult) -> Result<String> {
        match self {
            OutputFormat::Text => Ok(result.to_string()),
            OutputFormat::Json => result.to_json().into_diagnostic(),
        }
    }
}
