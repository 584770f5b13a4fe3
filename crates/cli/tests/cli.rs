//! Integration tests for the `tandem` binary.

use std::process::Command;

fn tandem() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tandem"));
    cmd.env_remove("TANDEM_MODEL").env_remove("TANDEM_ITERATIONS");
    cmd
}

#[test]
fn config_prints_resolved_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    std::fs::write(
        &path,
        r#"
name = "helper"
model = "fast"

[models]
fast = "backend-mini"
"#,
    )
    .unwrap();

    let output = tandem().arg("config").arg(&path).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("helper"));
    assert!(stdout.contains("fast -> backend-mini"));
}

#[test]
fn config_rejects_invalid_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    std::fs::write(&path, "temperature = 9.0\n").unwrap();

    let output = tandem().arg("config").arg(&path).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("temperature"));
}

#[test]
fn transcript_renders_jsonl_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"role":"user","content":"2+2?"}"#,
            "\n",
            r#"{"role":"assistant","content":[{"type":"text","text":"4"}]}"#,
            "\n"
        ),
    )
    .unwrap();

    let output = tandem().arg("transcript").arg(&path).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("User: 2+2?"));
    assert!(stdout.contains("Assistant: 4"));
}

#[test]
fn init_writes_loadable_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tandem.toml");

    assert!(tandem().arg("init").arg(&path).status().unwrap().success());
    assert!(!tandem().arg("init").arg(&path).status().unwrap().success());
    assert!(tandem().args(["config", "--toml"]).arg(&path).status().unwrap().success());
}
