//! The line-oriented command language read by sessions.
//!
//! One instruction per line, e.g. `begin(T1)`, `beginRO(T2)`, `R(T1,x3)`, `W(T1,x3,15)`,
//! `end(T1)`, `fail(2)`, `recover(2)` and `dump()`. Whitespace between tokens is ignored, `//`
//! starts a comment, and a line starting with `===` ends the script.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use itertools::Itertools;
use miette::Diagnostic;
use repcrec_common::{SiteId, TxnId, Value, VariableId};
use serde::Serialize;
use thiserror::Error;
use winnow::ascii::{alpha1, dec_int, dec_uint, space0};
use winnow::combinator::{
    alt, cut_err, delimited, empty, eof, fail, opt, preceded, separated_pair, terminated,
};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::stream::Stream;
use winnow::token::rest;
use winnow::{ModalResult, Parser};

/// Keywords of the command language, as written in scripts.
pub const KEYWORDS: [&str; 8] = ["begin", "beginRO", "R", "W", "end", "fail", "recover", "dump"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Begin {
        txn: TxnId,
    },
    BeginReadOnly {
        txn: TxnId,
    },
    Read {
        txn: TxnId,
        variable: VariableId,
    },
    Write {
        txn: TxnId,
        variable: VariableId,
        value: Value,
    },
    End {
        txn: TxnId,
    },
    Fail {
        site: SiteId,
    },
    Recover {
        site: SiteId,
    },
    Dump,
}

impl Command {
    /// The transaction the command belongs to, if any.
    pub fn txn(&self) -> Option<TxnId> {
        match self {
            Self::Begin { txn }
            | Self::BeginReadOnly { txn }
            | Self::Read { txn, .. }
            | Self::Write { txn, .. }
            | Self::End { txn } => Some(*txn),
            Self::Fail { .. } | Self::Recover { .. } | Self::Dump => None,
        }
    }

    /// Whether the command has to run in program order with the other operations of its
    /// transaction.
    pub fn is_ordered(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Write { .. } | Self::End { .. })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin { txn } => write!(f, "begin({txn})"),
            Self::BeginReadOnly { txn } => write!(f, "beginRO({txn})"),
            Self::Read { txn, variable } => write!(f, "R({txn},{variable})"),
            Self::Write {
                txn,
                variable,
                value,
            } => write!(f, "W({txn},{variable},{value})"),
            Self::End { txn } => write!(f, "end({txn})"),
            Self::Fail { site } => write!(f, "fail({site})"),
            Self::Recover { site } => write!(f, "recover({site})"),
            Self::Dump => write!(f, "dump()"),
        }
    }
}

/// A parsed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement {
    Command(Command),
    /// A blank or comment-only line.
    Empty,
    /// A `===` line. Nothing after it is read.
    EndOfScript,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("syntax error at line {line}, column {column}: {reason}")]
#[diagnostic(
    code(repcrec::syntax),
    help(
        "expected one of begin(T1), beginRO(T1), R(T1,x1), W(T1,x1,5), end(T1), fail(1), \
         recover(1) or dump()"
    )
)]
pub struct SyntaxError {
    #[source_code]
    input: Arc<str>,
    #[label("here")]
    span: Range<usize>,
    line: usize,
    column: usize,
    reason: String,
}

impl SyntaxError {
    /// `line_start` is the offset of the failing line within `input`, `offset` the position of
    /// the error within that line.
    fn new(
        input: &str,
        line_start: usize,
        line: usize,
        offset: usize,
        error: &ContextError,
    ) -> Self {
        let at = line_start + offset;
        let width = input[at..].chars().next().map_or(0, char::len_utf8);
        let column = input[line_start..at].chars().count() + 1;
        let message = error.to_string();
        let reason = if message.is_empty() {
            "unexpected input".to_string()
        } else {
            message.lines().join("; ")
        };
        Self {
            input: input.into(),
            span: at..at + width,
            line,
            column,
            reason,
        }
    }

    #[inline]
    pub fn span(&self) -> &Range<usize> {
        &self.span
    }

    /// One-based line and column of the error.
    #[inline]
    pub fn position(&self) -> (usize, usize) {
        (self.line, self.column)
    }

    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

pub fn parse_line(line: &str) -> Result<Statement, SyntaxError> {
    statement
        .parse(line)
        .map_err(|e| SyntaxError::new(line, 0, 1, e.offset(), e.inner()))
}

/// Parses every line up to and including the first `===` line.
pub fn parse_script(script: &str) -> Result<Vec<Statement>, SyntaxError> {
    let mut statements = Vec::new();
    let mut line_start = 0;
    for (index, raw) in script.split_inclusive('\n').enumerate() {
        let line = raw.trim_end_matches(['\n', '\r']);
        let parsed = statement.parse(line).map_err(|e| {
            SyntaxError::new(script, line_start, index + 1, e.offset(), e.inner())
        })?;
        statements.push(parsed);
        if parsed == Statement::EndOfScript {
            break;
        }
        line_start += raw.len();
    }
    Ok(statements)
}

fn statement(input: &mut &str) -> ModalResult<Statement> {
    preceded(
        space0,
        alt((
            eof.value(Statement::Empty),
            comment.value(Statement::Empty),
            preceded("===", rest).value(Statement::EndOfScript),
            terminated(command, line_end).map(Statement::Command),
        )),
    )
    .parse_next(input)
}

fn command(input: &mut &str) -> ModalResult<Command> {
    let start = input.checkpoint();
    let keyword = cut_err(alpha1.context(StrContext::Label("command"))).parse_next(input)?;
    match keyword {
        "begin" => args(txn_id)
            .map(|txn| Command::Begin { txn })
            .parse_next(input),
        "beginRO" => args(txn_id)
            .map(|txn| Command::BeginReadOnly { txn })
            .parse_next(input),
        "R" => args(separated_pair(txn_id, comma, variable))
            .map(|(txn, variable)| Command::Read { txn, variable })
            .parse_next(input),
        "W" => args((txn_id, comma, variable, comma, dec_int))
            .map(|(txn, (), variable, (), value)| Command::Write {
                txn,
                variable,
                value,
            })
            .parse_next(input),
        "end" => args(txn_id)
            .map(|txn| Command::End { txn })
            .parse_next(input),
        "fail" => args(site_id)
            .map(|site| Command::Fail { site })
            .parse_next(input),
        "recover" => args(site_id)
            .map(|site| Command::Recover { site })
            .parse_next(input),
        "dump" => args(empty).value(Command::Dump).parse_next(input),
        _ => {
            input.reset(&start);
            cut_err(fail)
                .context(StrContext::Label("command"))
                .context(StrContext::Expected(StrContextValue::Description(
                    "begin, beginRO, R, W, end, fail, recover or dump",
                )))
                .parse_next(input)
        }
    }
}

/// `( inner )`, committed once the keyword has matched.
fn args<'i, O, P>(inner: P) -> impl Parser<&'i str, O, ErrMode<ContextError>>
where
    P: Parser<&'i str, O, ErrMode<ContextError>>,
{
    preceded(
        (space0, cut_err('('.context(expected_char('(')))),
        cut_err(terminated(
            delimited(space0, inner, space0),
            ')'.context(expected_char(')')),
        )),
    )
}

fn comma(input: &mut &str) -> ModalResult<()> {
    (space0, ',', space0)
        .void()
        .context(expected_char(','))
        .parse_next(input)
}

fn txn_id(input: &mut &str) -> ModalResult<TxnId> {
    preceded('T', dec_uint)
        .map(TxnId::new)
        .context(StrContext::Label("transaction id"))
        .context(StrContext::Expected(StrContextValue::Description(
            "`T` followed by a number",
        )))
        .parse_next(input)
}

fn variable(input: &mut &str) -> ModalResult<VariableId> {
    preceded('x', dec_uint.verify_map(VariableId::new))
        .context(StrContext::Label("variable"))
        .context(StrContext::Expected(StrContextValue::Description(
            "`x` followed by a positive number",
        )))
        .parse_next(input)
}

fn site_id(input: &mut &str) -> ModalResult<SiteId> {
    dec_uint
        .verify_map(SiteId::new)
        .context(StrContext::Label("site"))
        .context(StrContext::Expected(StrContextValue::Description(
            "a positive site number",
        )))
        .parse_next(input)
}

fn comment<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    preceded("//", rest).parse_next(input)
}

fn line_end(input: &mut &str) -> ModalResult<()> {
    cut_err(
        (space0, opt(comment), eof)
            .void()
            .context(StrContext::Expected(StrContextValue::Description(
                "end of line",
            ))),
    )
    .parse_next(input)
}

fn expected_char(c: char) -> StrContext {
    StrContext::Expected(StrContextValue::CharLiteral(c))
}
