use std::io::Write;

use tempfile::NamedTempFile;

mod common;

fn script(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_cli_help() {
    let output = common::run_cli().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = common::stdout(&output);
    assert!(stdout.contains("execute"));
    assert!(stdout.contains("shell"));
}

#[test]
fn test_execute_text() {
    let file = script("begin(T1)\nW(T1,x1,101)\nend(T1)\ndump()\n");
    let output = common::run_cli()
        .arg("execute")
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = common::stdout(&output);
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(&lines[..3], [
        "T1 begins",
        "T1 writes x1 = 101 at sites 2",
        "T1 commits",
    ]);
    assert_eq!(
        lines[3],
        "site 1 - x2: 20, x4: 40, x6: 60, x8: 80, x10: 100, x12: 120, x14: 140, x16: 160, \
         x18: 180, x20: 200"
    );
    assert!(lines[4].starts_with("site 2 - x1: 101, x2: 20, x4: 40,"));
    assert_eq!(lines.len(), 13);
}

#[test]
fn test_execute_json() {
    let file = script("begin(T1)\nR(T1,x3)\n");
    let output = common::run_cli()
        .args(["execute", "--format", "json"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = common::stdout(&output);
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains(r#""op":"begin""#));
    assert!(lines[1].contains(r#""event":"read""#));
    assert!(lines[1].contains(r#""value":30"#));
}

#[test]
fn test_execute_with_fewer_sites() {
    let file = script("fail(2)\nbegin(T1)\nR(T1,x3)\n");
    let output = common::run_cli()
        .args(["execute", "--sites", "2", "--variables", "4"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    // x3 lives on site 1 + 3 mod 2 = 2, which is down.
    assert!(common::stdout(&output).contains("R(T1,x3) waits for a site to come up"));
}

#[test]
fn test_execute_syntax_error() {
    let file = script("begin(T1)\nW(T1,x1)\n");
    let output = common::run_cli()
        .arg("execute")
        .arg(file.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(common::stdout(&output).is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("syntax error at line 2"));
}

#[test]
fn test_execute_missing_file() {
    let output = common::run_cli()
        .args(["execute", "no/such/script.txt"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read"));
}

#[test]
fn test_invalid_config() {
    let file = script("dump()\n");
    let output = common::run_cli()
        .args(["execute", "--sites", "0"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid configuration"));
}
