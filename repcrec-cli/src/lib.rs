mod cli;
mod output;
mod script_executor;
mod shell;

pub use cli::Cli;
