//! Command line behaviour of the `blogchat-server` binary.

use std::process::Command;

fn binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_blogchat-server"))
}

#[test]
fn help_lists_the_serve_command() {
    let output = binary().arg("--help").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Live chat and moderation backend for the blog"));
    assert!(stdout.contains("serve"));
}

#[test]
fn unknown_commands_fail() {
    let output = binary().arg("invalid-command").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn unreadable_config_file_fails_before_binding() {
    let dir = tempfile::tempdir().unwrap();
    let output = binary()
        .args(["serve", "--port", "0", "--config"])
        .arg(dir.path().join("missing.yaml"))
        .env_remove("BLOGCHAT_DATABASE_URL")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load configuration"));
}
