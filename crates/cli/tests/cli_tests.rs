#![allow(deprecated)] // cargo_bin is deprecated but still functional

use assert_cmd::Command;
use httpmock::Method::{DELETE, GET};
use httpmock::MockServer;
use predicates::str::contains;
use std::fs;
use std::net::TcpListener;
use std::path::Path;
use tempfile::TempDir;

const SONG_ID: &str = "6f1c1a8e-4f44-4c0e-9f0a-1d2b3c4d5e6f";

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// `cadencectl` with the environment isolated from the caller's config.
fn cadencectl(config_path: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cadencectl").unwrap();
    cmd.env_remove("CADENCE_SERVER")
        .env_remove("CADENCE_CLIENT_OFFLINE__DIR")
        .env_remove("CADENCE_CLIENT_OFFLINE__CAPACITY_BYTES")
        .env("CADENCE_CLIENT_CONFIG", config_path);
    cmd
}

fn write_config(temp: &TempDir, server: Option<&str>) -> std::path::PathBuf {
    let config_path = temp.path().join("client.toml");
    let offline_dir = temp.path().join("offline");
    let mut contents = String::new();
    if let Some(server) = server {
        contents.push_str(&format!("server = \"{server}\"\n"));
    }
    contents.push_str(&format!(
        "\n[offline]\ndir = \"{}\"\ncapacity_bytes = 1048576\n",
        offline_dir.display()
    ));
    fs::write(&config_path, contents).unwrap();
    config_path
}

#[test]
fn set_server_writes_client_config() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("nested").join("client.toml");

    cadencectl(&config_path)
        .args(["config", "set-server", "http://music.local:8080/"])
        .assert()
        .success()
        .stdout(contains("Server set to http://music.local:8080"));

    let contents = fs::read_to_string(&config_path).unwrap();
    let value: toml::Value = toml::from_str(&contents).unwrap();
    assert_eq!(
        value.get("server").and_then(|v| v.as_str()),
        Some("http://music.local:8080")
    );

    cadencectl(&config_path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(contains("Server: http://music.local:8080"));
}

#[test]
fn set_server_rejects_missing_scheme() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("client.toml");

    cadencectl(&config_path)
        .args(["config", "set-server", "music.local"])
        .assert()
        .failure()
        .stderr(contains("must start with http://"));

    assert!(!config_path.exists());
}

#[test]
fn commands_without_server_explain_setup() {
    let temp = TempDir::new().unwrap();
    let config_path = write_config(&temp, None);

    cadencectl(&config_path)
        .arg("list")
        .assert()
        .failure()
        .stderr(contains("config set-server"));
}

#[test]
fn edit_requires_a_change() {
    let temp = TempDir::new().unwrap();
    let config_path = write_config(&temp, None);

    cadencectl(&config_path)
        .args(["edit", SONG_ID])
        .assert()
        .failure()
        .stderr(contains("nothing to change"));
}

#[test]
fn list_prints_songs() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/songs").query_param("q", "blue");
        then.status(200).json_body(serde_json::json!([{
            "id": SONG_ID,
            "title": "Blue",
            "artist": "Joni Mitchell",
            "duration_ms": 181500,
            "content_type": "audio/mpeg",
            "content_length": 4096,
            "content_hash": "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }]));
    });

    let temp = TempDir::new().unwrap();
    let config_path = write_config(&temp, Some(&server.base_url()));

    cadencectl(&config_path)
        .args(["list", "--query", "blue"])
        .assert()
        .success()
        .stdout(contains("Blue"))
        .stdout(contains("Joni Mitchell"))
        .stdout(contains("3:01"))
        .stdout(contains("4.00 KB"));
}

#[test]
fn api_errors_print_code_and_message() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(DELETE).path(format!("/v1/songs/{SONG_ID}"));
        then.status(404).json_body(serde_json::json!({
            "code": "not_found",
            "message": "song not found"
        }));
    });

    let temp = TempDir::new().unwrap();
    let config_path = write_config(&temp, None);

    // --server overrides the (empty) config
    cadencectl(&config_path)
        .args(["delete", SONG_ID, "--server", &server.base_url()])
        .assert()
        .failure()
        .stderr(contains("not_found"))
        .stderr(contains("song not found"));
}

#[test]
fn download_rejects_inverted_range() {
    let temp = TempDir::new().unwrap();
    let config_path = write_config(&temp, Some("http://127.0.0.1:9"));

    cadencectl(&config_path)
        .args(["download", SONG_ID, "--range", "10-2"])
        .assert()
        .failure()
        .stderr(contains("invalid --range"));
}

#[test]
fn offline_status_on_empty_cache() {
    let temp = TempDir::new().unwrap();
    let config_path = write_config(&temp, None);

    cadencectl(&config_path)
        .args(["offline", "status"])
        .assert()
        .success()
        .stdout(contains("1.00 MB"))
        .stdout(contains("No songs cached."));

    assert!(temp.path().join("offline").exists());
}

#[test]
fn offline_get_misses_without_server() {
    let temp = TempDir::new().unwrap();
    let config_path = write_config(&temp, None);

    cadencectl(&config_path)
        .args(["offline", "get", SONG_ID])
        .assert()
        .failure()
        .stderr(contains("not available offline"));

    cadencectl(&config_path)
        .args(["offline", "save", SONG_ID])
        .assert()
        .failure()
        .stderr(contains("no server configured"));
}
