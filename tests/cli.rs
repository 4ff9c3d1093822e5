use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use nexus_chat::config::load_config;
use nexus_chat::models::Role;
use nexus_chat::store::{SqliteTranscriptStore, TranscriptStore};
use nexus_chat::{db, migrate};
use tempfile::TempDir;

fn nexus_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("nexus");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/nexus.sqlite"

[server]
bind = "127.0.0.1:0"

[agent]
name = "Iris"
"#,
        root.display()
    );

    let config_path = config_dir.join("nexus.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_nexus(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = nexus_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run nexus binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

async fn seed(config_path: &Path, turns: &[(Role, &str)]) {
    let cfg = load_config(config_path).unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let store = SqliteTranscriptStore::new(pool);
    for (role, content) in turns {
        store.append_turn(*role, content).await.unwrap();
    }
    store.close().await;
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_nexus(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));
    assert!(tmp.path().join("data/nexus.sqlite").exists());

    // idempotent
    let (_, stderr, success) = run_nexus(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_history_on_empty_database() {
    let (_tmp, config_path) = setup_test_env();
    run_nexus(&config_path, &["init"]);

    let (stdout, stderr, success) = run_nexus(&config_path, &["history"]);
    assert!(success, "history failed: {}", stderr);
    assert!(stdout.contains("No messages."));
}

#[tokio::test]
async fn test_history_prints_turns_in_order() {
    let (_tmp, config_path) = setup_test_env();
    seed(
        &config_path,
        &[(Role::User, "Hello"), (Role::Model, "Hi there"), (Role::User, "Bye")],
    )
    .await;

    let (stdout, stderr, success) = run_nexus(&config_path, &["history"]);
    assert!(success, "history failed: {}", stderr);

    let hello = stdout.find("you> Hello").expect("user turn missing");
    let reply = stdout.find("Iris> Hi there").expect("model turn missing");
    let bye = stdout.find("you> Bye").expect("last turn missing");
    assert!(hello < reply && reply < bye);
    assert!(stdout.contains("3 messages"));
}

#[tokio::test]
async fn test_clear_wipes_transcript() {
    let (_tmp, config_path) = setup_test_env();
    seed(&config_path, &[(Role::User, "forget me")]).await;

    let (stdout, stderr, success) = run_nexus(&config_path, &["clear"]);
    assert!(success, "clear failed: {}", stderr);
    assert!(stdout.contains("Conversation cleared."));

    let (stdout, _, _) = run_nexus(&config_path, &["history"]);
    assert!(stdout.contains("No messages."));
}

#[test]
fn test_invalid_config_is_reported() {
    let (tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[agent]\ntemperature = 2.0\n").unwrap();

    let (_, stderr, success) = run_nexus(&config_path, &["history"]);
    assert!(!success);
    assert!(stderr.contains("agent.temperature"));
    drop(tmp);
}

#[test]
fn test_chat_rejects_out_of_range_temperature() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_nexus(&config_path, &["chat", "--temperature", "3"]);
    assert!(!success);
    assert!(stderr.contains("--temperature"));
}
