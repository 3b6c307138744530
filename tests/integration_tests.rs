//! CLI-level tests: argument surface and startup failure modes.
//!
//! Everything that needs a live board or forge is covered by the unit
//! tests against in-memory fakes; here we only drive the binary far
//! enough to see it read its arguments and environment.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A boardsync command isolated from the developer's environment: no
/// connection variables, and a fresh working directory so no .env file
/// is picked up.
fn boardsync(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("boardsync");
    cmd.current_dir(dir.path());
    for var in [
        "KANBAN_URL",
        "KANBAN_USER",
        "KANBAN_TOKEN",
        "FORGE_URL",
        "FORGE_TOKEN",
        "FORGE_PROJECT",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn help_lists_both_subcommands() {
    let dir = TempDir::new().unwrap();
    boardsync(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("actions"));
}

#[test]
fn version_runs() {
    let dir = TempDir::new().unwrap();
    boardsync(&dir).arg("--version").assert().success();
}

#[test]
fn sync_without_board_credentials_fails_early() {
    let dir = TempDir::new().unwrap();
    boardsync(&dir)
        .arg("sync")
        .arg("--dry-run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("KANBAN_URL"));
}

#[test]
fn sync_reads_connection_settings_from_dotenv() {
    let dir = TempDir::new().unwrap();
    // Past the board variables, the next missing setting is the forge's.
    fs::write(
        dir.path().join(".env"),
        "KANBAN_URL=https://boards.example.org/jsonrpc.php\nKANBAN_TOKEN=secret\n",
    )
    .unwrap();
    boardsync(&dir)
        .arg("sync")
        .arg("-n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("FORGE_URL"));
}

#[test]
fn actions_requires_board_credentials() {
    let dir = TempDir::new().unwrap();
    boardsync(&dir)
        .args(["actions", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KANBAN_TOKEN").or(predicate::str::contains("KANBAN_URL")));
}

#[test]
fn unknown_subcommand_is_rejected() {
    let dir = TempDir::new().unwrap();
    boardsync(&dir).arg("frobnicate").assert().failure();
}
