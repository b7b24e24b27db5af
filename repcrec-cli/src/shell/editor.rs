use std::borrow::Cow;

use miette::IntoDiagnostic;
use repcrec::KEYWORDS;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::HistoryHinter;
use rustyline::history::FileHistory;
use rustyline::{
    Completer, CompletionType, Config, Context, Editor, Helper, Highlighter, Hinter, Result,
    Validator,
};
use strum::VariantNames;

use super::command::ShellCommand;

pub type ShellEditor = Editor<ShellHelper, FileHistory>;

pub fn build_editor() -> miette::Result<ShellEditor> {
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .build();
    let mut editor = Editor::with_config(config).into_diagnostic()?;
    let helper = ShellHelper {
        completer: ShellCompleter,
        highlighter: ShellHighlighter,
        hinter: HistoryHinter::new(),
    };
    editor.set_helper(Some(helper));
    Ok(editor)
}

#[derive(Helper, Completer, Highlighter, Hinter, Validator)]
pub struct ShellHelper {
    #[rustyline(Completer)]
    completer: ShellCompleter,

    #[rustyline(Highlighter)]
    highlighter: ShellHighlighter,

    #[rustyline(Hinter)]
    hinter: HistoryHinter,
}

/// Splits `line` into leading whitespace, its first word and the rest.
fn split_first_word(line: &str) -> (&str, &str, &str) {
    let start = line.len() - line.trim_start().len();
    let end = line[start..]
        .find(|c: char| c.is_whitespace() || c == '(')
        .map_or(line.len(), |i| start + i);
    (&line[..start], &line[start..end], &line[end..])
}

fn is_shell_command(word: &str) -> bool {
    word.strip_prefix(':')
        .is_some_and(|name| ShellCommand::VARIANTS.iter().any(|v| *v == name))
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|keyword| *keyword == word)
}

struct ShellHighlighter;

impl Highlighter for ShellHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let (indent, word, rest) = split_first_word(line);
        if is_shell_command(word) {
            // Shell commands are bold yellow.
            format!("{indent}\x1b[1;33m{word}\x1b[0m{rest}").into()
        } else if is_keyword(word) {
            // Keywords are bold green.
            format!("{indent}\x1b[1;32m{word}\x1b[0m{rest}").into()
        } else {
            line.into()
        }
    }

    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        prompt: &'p str,
        _default: bool,
    ) -> Cow<'b, str> {
        // Make the prompt bold.
        format!("\x1b[1m{prompt}\x1b[0m").into()
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        // Grey46
        format!("\x1b[38;5;243m{hint}\x1b[0m").into()
    }

    fn highlight_char(&self, line: &str, _pos: usize, _kind: CmdKind) -> bool {
        !line.is_empty()
    }
}

/// Completes shell commands and the keyword a command starts with.
pub struct ShellCompleter;

impl ShellCompleter {
    fn candidates(prefix: &str) -> Vec<Pair> {
        if let Some(name) = prefix.strip_prefix(':') {
            ShellCommand::VARIANTS
                .iter()
                .filter(|candidate| candidate.starts_with(name))
                .map(|candidate| Pair {
                    display: format!(":{candidate}"),
                    replacement: format!(":{candidate}"),
                })
                .collect()
        } else {
            KEYWORDS
                .iter()
                .filter(|keyword| keyword.starts_with(prefix))
                .map(|keyword| Pair {
                    display: keyword.to_string(),
                    replacement: format!("{keyword}("),
                })
                .collect()
        }
    }
}

impl Completer for ShellCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context,
    ) -> Result<(usize, Vec<Self::Candidate>)> {
        let (indent, word, rest) = split_first_word(&line[..pos]);
        // Only the first word of a line is completed.
        if !rest.is_empty() {
            return Ok((pos, Vec::new()));
        }
        Ok((indent.len(), Self::candidates(word)))
    }
}
