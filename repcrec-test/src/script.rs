//! Running scripts and rendering what they did.

use std::fmt::Write;

use repcrec::invariants::{InvariantChecker, InvariantViolation};
use repcrec::{Database, DatabaseConfig, QueryResult, Result, Statement, parse_script};

/// Renders results as one `[tick] command` header per command, followed by its events.
pub fn render(results: &[QueryResult]) -> String {
    let mut out = String::new();
    for result in results {
        let _ = writeln!(out, "[{}] {}", result.tick(), result.command());
        for event in result.iter() {
            for line in event.to_string().lines() {
                let _ = writeln!(out, "  {line}");
            }
        }
    }
    out
}

/// Runs `script` on a fresh database with the default layout.
pub fn run_script(script: &str) -> Result<String> {
    let mut session = Database::open_in_memory(&DatabaseConfig::default())?.session();
    let results = session.execute_script(script)?;
    Ok(render(&results))
}

/// Runs `script` command by command, checking every invariant after each one.
pub fn check_script(script: &str) -> Result<Vec<InvariantViolation>> {
    let mut session = Database::open_in_memory(&DatabaseConfig::default())?.session();
    let mut checker = InvariantChecker::new();
    for (index, statement) in parse_script(script)?.into_iter().enumerate() {
        match statement {
            Statement::Command(command) => {
                session.run(command)?;
                checker.check_all(session.manager(), index);
            }
            Statement::Empty => {}
            Statement::EndOfScript => break,
        }
    }
    Ok(checker.violations().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let out = run_script("begin(T1)\n// nothing\nR(T1,x3)\n").unwrap();
        assert_eq!(
            out,
            "[1] begin(T1)\n  T1 begins\n[2] R(T1,x3)\n  T1 reads x3 = 30 at site 4\n"
        );
    }

    #[test]
    fn test_render_indents_dump() {
        let out = run_script("dump()").unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 11);
        assert_eq!(lines[0], "[1] dump()");
        assert!(lines[1].starts_with("  site 1 - x2: 20,"));
        assert!(lines[10].starts_with("  site 10 - x2: 20,"));
    }

    #[test]
    fn test_check_script() {
        let violations = check_script("begin(T1)\nW(T1,x2,3)\nfail(1)\nend(T1)\n").unwrap();
        assert!(violations.is_empty(), "{violations:?}");
    }
}
