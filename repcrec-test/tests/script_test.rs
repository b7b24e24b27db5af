//! Runs every script under `resources/scripts` with the invariant checker after each command.
//!
//! Scripts whose name starts with `_` are skipped.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use libtest_mimic::{Arguments, Failed, Trial};
use repcrec_test::script::check_script;

const PREFIX: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../resources/scripts");

fn discover_tests() -> Vec<PathBuf> {
    let pattern = format!("{PREFIX}/**/[!_]*.txt");
    glob::glob(&pattern)
        .expect("failed to read glob pattern")
        .filter_map(Result::ok)
        .collect()
}

fn run_one(path: &Path) -> Result<(), Failed> {
    let script = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let violations = check_script(&script).map_err(|e| e.to_string())?;
    if violations.is_empty() {
        Ok(())
    } else {
        Err(format!("{violations:#?}").into())
    }
}

fn main() -> ExitCode {
    let files = discover_tests();
    assert!(!files.is_empty(), "no scripts found under `{PREFIX}`");
    let trials = files
        .into_iter()
        .map(|path| {
            let name = path
                .strip_prefix(PREFIX)
                .unwrap_or(&path)
                .display()
                .to_string();
            Trial::test(format!("repcrec::{name}"), move || run_one(&path))
        })
        .collect();
    libtest_mimic::run(&Arguments::from_args(), trials).exit_code()
}
