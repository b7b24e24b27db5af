use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{ColorChoice, Command, CommandFactory, FromArgMatches, Parser};
use itertools::Itertools;
use miette::{IntoDiagnostic, Result};
use strum::VariantNames;

use super::context::ShellContext;
use crate::output::OutputFormat;

pub fn build_command() -> Command {
    ShellCommand::command()
        .multicall(true)
        .help_template("{before-help}{subcommands}{after-help}")
        .before_help("Usage hints:")
        .after_help(
            "Anything else is run as a command, e.g. \"begin(T1)\" or \"W(T1,x2,5)\".\n\
             Enter \":help <COMMAND>\" for more information about a shell command.",
        )
        .color(ColorChoice::Never)
        .disable_colored_help(true)
        .disable_help_flag(true)
        .disable_help_subcommand(true)
}

#[derive(Debug, Parser, VariantNames)]
#[strum(serialize_all = "kebab-case")]
pub enum ShellCommand {
    /// Show usage hints.
    #[command(name = ":help")]
    Help {
        /// The command to show help for.
        /// If not provided, the help for all commands will be shown.
        command: Option<String>,
    },

    /// Exit the shell.
    #[command(name = ":quit")]
    Quit,

    /// Show command history.
    #[command(name = ":history")]
    History,

    /// Set output format.
    #[command(name = ":format")]
    Format {
        /// The output format to change to.
        /// If not provided, the current output format will be printed.
        format: Option<OutputFormat>,
    },

    /// Show the clock, down sites, transactions and queued operations.
    #[command(name = ":status")]
    Status,
}

impl ShellCommand {
    pub fn execute_from_input(ctx: &mut ShellContext, input: &str) -> Result<()> {
        let input = input.split_whitespace().collect_vec();
        let matches = ctx
            .command
            .try_get_matches_from_mut(input)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSubcommand => {
                    let invalid = context_string(&e, ContextKind::InvalidSubcommand);
                    let diag = miette::diagnostic!("unknown command: \"{}\"", invalid);
                    let help = match e.get(ContextKind::SuggestedSubcommand) {
                        Some(ContextValue::Strings(s)) if s.len() == 1 => {
                            format!("did you mean \"{}\"?", s[0])
                        }
                        _ => "enter \":help\" for usage hints".into(),
                    };
                    diag.with_help(help)
                }
                ErrorKind::UnknownArgument => {
                    let arg = context_string(&e, ContextKind::InvalidArg);
                    miette::diagnostic!("unknown argument: \"{}\"", arg)
                        .with_help("enter \":help\" for usage hints")
                }
                ErrorKind::InvalidValue => {
                    let invalid_arg = context_string(&e, ContextKind::InvalidArg);
                    let invalid_value = context_string(&e, ContextKind::InvalidValue);
                    let diag = miette::diagnostic!(
                        "invalid value for argument {}: \"{}\"",
                        invalid_arg,
                        invalid_value
                    );
                    match e.get(ContextKind::ValidValue) {
                        Some(ContextValue::Strings(s)) => {
                            let values = s.iter().map(|s| format!("\"{}\"", s)).join(", ");
                            diag.with_help(format!("possible values: {}", values))
                        }
                        _ => diag,
                    }
                }
                _ => miette::diagnostic!("{}", e.to_string().trim_end()),
            })?;
        let cmd = Self::from_arg_matches(&matches).into_diagnostic()?;

        match cmd {
            ShellCommand::Help { command } => help(ctx, command),
            ShellCommand::Quit => quit(ctx),
            ShellCommand::History => history(ctx),
            ShellCommand::Format { format } => set_format(ctx, format),
            ShellCommand::Status => status(ctx),
        }
    }
}

fn context_string(e: &clap::Error, kind: ContextKind) -> String {
    e.get(kind).map(ToString::to_string).unwrap_or_default()
}

fn help(ctx: &mut ShellContext, command: Option<String>) -> Result<()> {
    if let Some(command) = command {
        let name = if command.starts_with(':') {
            command
        } else {
            format!(":{command}")
        };
        let subcommand = ctx
            .command
            .find_subcommand_mut(&name)
            .ok_or_else(|| miette::diagnostic!("unknown command: \"{}\"", name))?;
        println!("{}", subcommand.render_long_help());
    } else {
        println!("{}", ctx.command.render_help());
    }
    Ok(())
}

fn quit(ctx: &mut ShellContext) -> Result<()> {
    ctx.should_quit = true;
    Ok(())
}

fn history(ctx: &mut ShellContext) -> Result<()> {
    for (index, line) in ctx.editor.history().iter().enumerate() {
        println!("{}\t{}", index + 1, line);
    }
    Ok(())
}

fn set_format(ctx: &mut ShellContext, format: Option<OutputFormat>) -> Result<()> {
    if let Some(format) = format {
        ctx.format = format;
    } else {
        println!("current output format: {}", ctx.format);
    }
    Ok(())
}

fn status(ctx: &mut ShellContext) -> Result<()> {
    println!("{}", ctx.session.status());
    Ok(())
}
