use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn script(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".lua")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn eval_prints_the_result() {
    Command::cargo_bin("lunaria")
        .unwrap()
        .args(["eval", "1 + 1"])
        .assert()
        .success()
        .stdout("2\n");
}

#[test]
fn eval_reports_errors() {
    Command::cargo_bin("lunaria")
        .unwrap()
        .args(["eval", "1 + {}"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("arithmetic"));
}

#[test]
fn run_executes_a_script() {
    let file = script("local greeting = 'hello'\nprint(greeting .. ', world')\n");
    Command::cargo_bin("lunaria")
        .unwrap()
        .arg("run")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("hello, world"));
}

#[test]
fn run_surfaces_script_errors() {
    let file = script("error('kaput')\n");
    Command::cargo_bin("lunaria")
        .unwrap()
        .arg("run")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("kaput"));
}

#[test]
fn run_rejects_missing_files() {
    Command::cargo_bin("lunaria")
        .unwrap()
        .args(["run", "does-not-exist.lua"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}
