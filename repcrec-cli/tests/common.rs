use std::io::Write;
use std::process::{Command, Output, Stdio};

use insta_cmd::get_cargo_bin;

pub fn run_cli() -> Command {
    let mut cmd = Command::new(get_cargo_bin("repcrec"));
    cmd.env("RUST_LOG", "off");
    cmd
}

/// Runs the shell with `input` on stdin and waits for it to exit.
pub fn run_shell(args: &[&str], input: &str) -> Output {
    let mut child = run_cli()
        .arg("shell")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}
