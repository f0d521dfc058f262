//! Integration tests for the `vigil` CLI binary.
//!
//! Argument parsing, help output, completions, and error exit codes run
//! without a bus. The live tests spin up a small in-process event bus
//! that replays retained state and echoes commands back.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use assert_cmd::cargo::cargo_bin_cmd;
use futures_util::{SinkExt, StreamExt};
use predicates::prelude::*;
use tokio_tungstenite::tungstenite::Message;

use vigil_api::{BusMessage, ClientFrame};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `vigil` binary with env isolation.
///
/// Clears all `VIGIL_*` env vars and points config directories at an
/// empty temp dir so tests never touch the user's real configuration.
fn vigil_cmd(home: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("vigil");
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("VIGIL_PROFILE")
        .env_remove("VIGIL_URL")
        .env_remove("VIGIL_TOKEN")
        .env_remove("VIGIL_OUTPUT")
        .env_remove("VIGIL_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Start a fake NVR bus on a background runtime and return its URL.
///
/// Subscribing to a topic with known state replays it as retained.
/// Publishing to `{camera}/{feature}/set` stores the value and echoes it
/// on the matching `/state` topic.
fn fake_bus(initial: &[(&str, serde_json::Value)]) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());

    let state: Arc<Mutex<HashMap<String, serde_json::Value>>> = Arc::new(Mutex::new(
        initial
            .iter()
            .map(|(topic, value)| ((*topic).to_owned(), value.clone()))
            .collect(),
    ));

    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(message)) = ws.next().await {
                        let Message::Text(text) = message else {
                            continue;
                        };
                        let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
                            continue;
                        };
                        let reply = match frame {
                            ClientFrame::Subscribe { topic } => {
                                let known = state.lock().unwrap().get(&topic).cloned();
                                known.map(|payload| BusMessage {
                                    topic,
                                    payload,
                                    retain: true,
                                })
                            }
                            ClientFrame::Publish { topic, payload, .. } => {
                                topic.strip_suffix("/set").map(|base| {
                                    let topic = format!("{base}/state");
                                    state.lock().unwrap().insert(topic.clone(), payload.clone());
                                    BusMessage {
                                        topic,
                                        payload,
                                        retain: false,
                                    }
                                })
                            }
                            ClientFrame::Unsubscribe { .. } => None,
                        };
                        if let Some(reply) = reply {
                            let text = serde_json::to_string(&reply).unwrap();
                            if ws.send(Message::text(text)).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
    });

    url
}

/// A bus endpoint that refuses every upgrade with `401 Unauthorized`.
fn rejecting_bus() -> String {
    use std::io::{Read, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { return };
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(
                b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
        }
    });
    url
}

fn front_door_bus() -> String {
    fake_bus(&[
        ("front_door/detect/state", serde_json::json!("OFF")),
        ("front_door/recordings/state", serde_json::json!("ON")),
        ("front_door/motion_threshold/state", serde_json::json!("30")),
    ])
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = vigil_cmd(&home).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home).arg("--help").assert().success().stdout(
        predicate::str::contains("camera")
            .and(predicate::str::contains("status"))
            .and(predicate::str::contains("toggle"))
            .and(predicate::str::contains("watch")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vigil"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_status_without_config_is_usage_error() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .args(["status", "front_door"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("config init"));
}

#[test]
fn test_http_url_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .args(["--url", "http://nvr.local:5000", "get", "front_door/detect"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ws://"));
}

#[test]
fn test_malformed_target_is_usage_error() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .args(["--url", "ws://127.0.0.1:9/ws", "get", "front_door"])
        .assert()
        .code(2);
}

#[test]
fn test_toggle_rejects_numeric_feature() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .args(["--url", "ws://127.0.0.1:9/ws", "toggle", "yard/motion_threshold"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("motion_threshold"));
}

#[test]
fn test_set_rejects_non_toggle_value() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .args(["--url", "ws://127.0.0.1:9/ws", "set", "yard/audio", "maybe"])
        .assert()
        .code(2);
}

#[test]
fn test_unreachable_bus_reports_connection_failure() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .args(["--url", "ws://127.0.0.1:9/ws", "--timeout", "1", "get", "yard/detect"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("Could not connect"));
}

#[test]
fn test_rejected_token_exits_with_auth_code() {
    let home = tempfile::tempdir().unwrap();
    let url = rejecting_bus();
    vigil_cmd(&home)
        .args(["--url", &url, "--token", "wrong", "--timeout", "5", "get", "yard/detect"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("rejected the connection"));
}

#[test]
fn test_tail_rejected_token_exits_with_auth_code() {
    let home = tempfile::tempdir().unwrap();
    let url = rejecting_bus();
    vigil_cmd(&home)
        .args(["--url", &url, "--timeout", "5", "tail", "yard/detect/state"])
        .assert()
        .code(3);
}

#[test]
fn test_unknown_profile_is_not_found() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .args(["--profile", "office", "status", "yard"])
        .assert()
        .code(4);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_show_no_config() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home).args(["config", "show"]).assert().success();
}

#[test]
fn test_config_init_then_profiles_and_show() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .args([
            "config",
            "init",
            "--url",
            "ws://nvr.local:5000/ws",
            "--name",
            "home",
            "--cameras",
            "front_door,garage",
        ])
        .assert()
        .success();

    vigil_cmd(&home)
        .args(["config", "profiles"])
        .assert()
        .success()
        .stdout(predicate::str::contains("home *"));

    vigil_cmd(&home)
        .args(["config", "set", "token", "s3cret"])
        .assert()
        .success();

    vigil_cmd(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("ws://nvr.local:5000/ws")
                .and(predicate::str::contains("\"front_door\", \"garage\""))
                .and(predicate::str::contains("s3cret").not()),
        );
}

#[test]
fn test_config_use_unknown_profile() {
    let home = tempfile::tempdir().unwrap();
    vigil_cmd(&home)
        .args(["config", "use", "nowhere"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("nowhere"));
}

// ── Live bus ────────────────────────────────────────────────────────

#[test]
fn test_get_prints_retained_value() {
    let home = tempfile::tempdir().unwrap();
    let url = front_door_bus();
    vigil_cmd(&home)
        .args(["--url", &url, "-o", "plain", "get", "front_door/detect"])
        .assert()
        .success()
        .stdout("OFF\n");
}

#[test]
fn test_config_file_defaults_apply_beneath_flags() {
    let home = tempfile::tempdir().unwrap();
    let url = front_door_bus();
    let dir = home.path().join(".config").join("vigil");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("config.toml"),
        format!(
            "default_profile = \"home\"\n\n[defaults]\noutput = \"plain\"\n\n[profiles.home]\nurl = \"{url}\"\n"
        ),
    )
    .unwrap();

    vigil_cmd(&home)
        .args(["get", "front_door/detect"])
        .assert()
        .success()
        .stdout("OFF\n");

    vigil_cmd(&home)
        .args(["-o", "json", "get", "front_door/detect"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"value\": \"OFF\""));
}

#[test]
fn test_set_is_confirmed_by_echo() {
    let home = tempfile::tempdir().unwrap();
    let url = front_door_bus();
    vigil_cmd(&home)
        .args(["--url", &url, "-o", "json", "set", "front_door/detect", "on"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"value\": \"ON\"")
                .and(predicate::str::contains("\"outcome\": \"confirmed\"")),
        );
}

#[test]
fn test_set_threshold_accepts_stringified_echo() {
    let home = tempfile::tempdir().unwrap();
    let url = front_door_bus();
    vigil_cmd(&home)
        .args(["--url", &url, "-o", "plain", "set", "front_door/motion_threshold", "25"])
        .assert()
        .success()
        .stdout("25\n");
}

#[test]
fn test_toggle_flips_current_value() {
    let home = tempfile::tempdir().unwrap();
    let url = front_door_bus();
    vigil_cmd(&home)
        .args(["--url", &url, "-o", "plain", "toggle", "front_door/recordings"])
        .assert()
        .success()
        .stdout("OFF\n");
}

#[test]
fn test_status_lists_dashboard_toggles() {
    let home = tempfile::tempdir().unwrap();
    let url = front_door_bus();
    vigil_cmd(&home)
        .args([
            "--url",
            &url,
            "-o",
            "plain",
            "status",
            "front_door",
            "--settle-ms",
            "300",
        ])
        .assert()
        .success()
        .stdout("front_door detect=OFF recordings=ON snapshots=- audio=-\n");
}

#[test]
fn test_tail_prints_raw_messages() {
    let home = tempfile::tempdir().unwrap();
    let url = front_door_bus();
    vigil_cmd(&home)
        .args([
            "--url",
            &url,
            "-o",
            "json",
            "tail",
            "front_door/detect/state",
            "-n",
            "1",
        ])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"topic\":\"front_door/detect/state\"")
                .and(predicate::str::contains("\"retain\":true")),
        );
}

#[test]
fn test_tail_collapses_repeated_topics() {
    let home = tempfile::tempdir().unwrap();
    let url = front_door_bus();
    let output = vigil_cmd(&home)
        .args([
            "--url",
            &url,
            "-o",
            "json",
            "tail",
            "front_door/detect/state",
            "front_door/detect/state",
            "front_door/recordings/state",
            "-n",
            "2",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("front_door/detect/state").count(), 1, "{stdout}");
    assert_eq!(stdout.matches("front_door/recordings/state").count(), 1, "{stdout}");
}
