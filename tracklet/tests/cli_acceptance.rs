//! CLI acceptance tests
//!
//! Each test runs the real binary in an isolated XDG environment with its
//! own config file and event database.

use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::thread;
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new(endpoint: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(xdg_config.join("tracklet")).expect("failed to create config dir");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        let config = format!(
            "app_id = \"testApp\"\nendpoint = \"{endpoint}\"\nsend_mode = \"batch\"\n"
        );
        fs::write(xdg_config.join("tracklet/config.toml"), config)
            .expect("failed to write config");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }
}

fn run_tracklet(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("tracklet"));
    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute tracklet: {e}"))
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Canned HTTP 200 endpoint on a background thread.
fn spawn_ok_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    let addr = listener.local_addr().expect("no local addr");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            thread::spawn(move || {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let body_start = loop {
                    let Ok(n) = stream.read(&mut chunk) else { return };
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let headers = String::from_utf8_lossy(&buf[..body_start]).to_lowercase();
                let content_length: usize = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0);
                while buf.len() < body_start + content_length {
                    let Ok(n) = stream.read(&mut chunk) else { break };
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            });
        }
    });
    format!("http://{addr}/collect")
}

#[test]
fn status_reports_identity_and_empty_queues() {
    let env = CliTestEnv::new("http://127.0.0.1:9/collect");
    let output = run_tracklet(&env, &["status"]);
    assert!(output.status.success(), "status failed: {output:?}");
    let stdout = stdout_of(&output);
    assert!(stdout.contains("device_id"));
    assert!(stdout.contains("\"pending_bytes\": 0"));
    assert!(stdout.contains("\"failed_bytes\": 0"));
}

#[test]
fn record_buffers_events_locally() {
    let env = CliTestEnv::new("http://127.0.0.1:9/collect");
    let output = run_tracklet(&env, &["record", "buttonClick", "--attr", "screen=home"]);
    assert!(output.status.success(), "record failed: {output:?}");
    assert!(stdout_of(&output).contains("Recorded 'buttonClick'"));

    let output = run_tracklet(&env, &["status"]);
    assert!(output.status.success());
    assert!(!stdout_of(&output).contains("\"pending_bytes\": 0"));
}

#[test]
fn record_rejects_malformed_attributes() {
    let env = CliTestEnv::new("http://127.0.0.1:9/collect");
    let output = run_tracklet(&env, &["record", "buttonClick", "--attr", "no-equals"]);
    assert!(!output.status.success());
}

#[test]
fn flush_delivers_buffered_events() {
    let endpoint = spawn_ok_endpoint();
    let env = CliTestEnv::new(&endpoint);
    let output = run_tracklet(&env, &["record", "buttonClick"]);
    assert!(output.status.success(), "record failed: {output:?}");

    let output = run_tracklet(&env, &["flush"]);
    assert!(output.status.success(), "flush failed: {output:?}");

    let output = run_tracklet(&env, &["status"]);
    assert!(stdout_of(&output).contains("\"pending_bytes\": 0"));
}

#[test]
fn flush_fails_when_the_endpoint_is_unreachable() {
    let env = CliTestEnv::new("http://127.0.0.1:9/collect");
    let output = run_tracklet(&env, &["record", "buttonClick"]);
    assert!(output.status.success());

    let output = run_tracklet(&env, &["flush"]);
    assert!(!output.status.success());

    // The buffered event is still there for a later retry.
    let output = run_tracklet(&env, &["status"]);
    assert!(!stdout_of(&output).contains("\"pending_bytes\": 0"));
}

#[test]
fn missing_config_is_a_clear_error() {
    let env = CliTestEnv::new("http://127.0.0.1:9/collect");
    fs::remove_file(env.xdg_config.join("tracklet/config.toml")).unwrap();
    let output = run_tracklet(&env, &["status"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("configuration"));
}

#[test]
fn immediate_record_delivers_right_away() {
    let endpoint = spawn_ok_endpoint();
    let env = CliTestEnv::new(&endpoint);
    let output = run_tracklet(&env, &["record", "buttonClick", "--immediate"]);
    assert!(output.status.success(), "record failed: {output:?}");
    assert!(stdout_of(&output).contains("delivered"));

    let output = run_tracklet(&env, &["status"]);
    assert!(stdout_of(&output).contains("\"pending_bytes\": 0"));
}
