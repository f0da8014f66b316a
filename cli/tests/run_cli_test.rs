use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

fn write_project(dir: &Path, name: &str, json: &str) -> Result<PathBuf, Box<dyn Error>> {
    let path = dir.join(name);
    fs::write(&path, json)?;
    Ok(path)
}

const HELLO: &str = r#"{
  "variables": { "score": 0 },
  "blocks": [{
    "name": "double %n", "kind": "reporter",
    "params": [{ "name": "n" }],
    "body": [{ "selector": "reportProduct", "kind": "reporter", "inputs": [{ "var": "n" }, 2] }]
  }],
  "sprites": [{
    "name": "Cat",
    "scripts": [[
      { "selector": "receiveGo" },
      { "selector": "bubble", "inputs": ["hello"] },
      { "selector": "doSetVar", "inputs": ["score", { "custom": "double %n", "inputs": [21] }] },
      { "selector": "bubble", "inputs": [{ "var": "score" }] }
    ]]
  }]
}"#;

#[test]
fn run_prints_what_sprites_say() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = write_project(dir.path(), "hello.json", HELLO)?;

    let mut cmd = Command::cargo_bin("blockrt")?;
    cmd.args(["run", path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Cat: hello\n"))
        .stdout(predicate::str::contains("Cat: 42\n"));
    Ok(())
}

#[test]
fn bare_file_runs_with_defaults_and_vars_are_printed_on_request() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = write_project(dir.path(), "hello.json", HELLO)?;

    let mut cmd = Command::cargo_bin("blockrt")?;
    cmd.arg(path.to_str().unwrap());
    cmd.assert().success().stdout(predicate::str::contains("score = ").not());

    let mut cmd = Command::cargo_bin("blockrt")?;
    cmd.args(["run", path.to_str().unwrap(), "--vars"]);
    cmd.assert().success().stdout(predicate::str::contains("score = 42"));
    Ok(())
}

#[test]
fn script_errors_fail_the_run() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = write_project(
        dir.path(),
        "broken.json",
        r#"{ "sprites": [{ "name": "Cat", "scripts": [[
            { "selector": "receiveGo" },
            { "selector": "bubble", "inputs": [{ "var": "ghost" }] }
        ]] }] }"#,
    )?;

    let mut cmd = Command::cargo_bin("blockrt")?;
    cmd.args(["run", path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error: ReferenceError: a variable of name 'ghost'"));
    Ok(())
}

#[test]
fn answers_are_fed_to_ask() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = write_project(
        dir.path(),
        "ask.json",
        r#"{ "sprites": [{ "name": "Cat", "scripts": [[
            { "selector": "receiveGo" },
            { "selector": "doAsk", "inputs": ["name?"] },
            { "selector": "bubble", "inputs": [{ "selector": "reportLastAnswer" }] }
        ]] }] }"#,
    )?;

    let mut cmd = Command::cargo_bin("blockrt")?;
    cmd.args(["run", path.to_str().unwrap(), "--answer", "Ada"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("ask: name? -> Ada"))
        .stdout(predicate::str::contains("Cat: Ada"));
    Ok(())
}

#[test]
fn endless_scripts_stop_at_the_tick_limit() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = write_project(
        dir.path(),
        "spin.json",
        r#"{ "sprites": [{ "name": "Cat", "scripts": [[
            { "selector": "receiveGo" },
            { "selector": "doForever", "inputs": [{ "script": [] }] }
        ]] }] }"#,
    )?;

    let mut cmd = Command::cargo_bin("blockrt")?;
    cmd.args(["run", path.to_str().unwrap(), "--max-ticks", "20"]);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("stopped after 20 ticks with scripts still running"));
    Ok(())
}

#[test]
fn check_summarizes_the_project() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = write_project(dir.path(), "hello.json", HELLO)?;

    let mut cmd = Command::cargo_bin("blockrt")?;
    cmd.args(["check", path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("1 sprite(s), 1 script(s), 1 custom block(s)"));
    Ok(())
}

#[test]
fn check_reports_invalid_projects() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = write_project(
        dir.path(),
        "bad.json",
        r#"{ "sprites": [{ "name": "Cat", "scripts": [[{ "custom": "missing" }]] }] }"#,
    )?;

    let mut cmd = Command::cargo_bin("blockrt")?;
    cmd.args(["check", path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unknown custom block 'missing'"));
    Ok(())
}

#[test]
fn parent_directory_paths_are_rejected() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("blockrt")?;
    cmd.args(["run", "../outside.json"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Parent directory components"));
    Ok(())
}

#[test]
fn no_arguments_prints_usage() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("blockrt")?;
    cmd.assert().failure().code(2).stderr(predicate::str::contains("Usage: blockrt"));
    Ok(())
}
