//! End-to-end runs of the `posts` binary against mocked Ollama endpoints.

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const DIMS: usize = 8;

/// Answers `/api/embed` with one letter-frequency vector per input.
struct EmbedResponder;

impl Respond for EmbedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| letter_vector(t.as_str().unwrap()))
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

fn letter_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for b in text.to_lowercase().bytes().filter(u8::is_ascii_lowercase) {
        v[(b - b'a') as usize % DIMS] += 1.0;
    }
    v
}

async fn mock_ollama() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(EmbedResponder)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "response": "Ship small, ship often." })),
        )
        .mount(&server)
        .await;
    server
}

fn setup_test_env(ollama_url: Option<&str>) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    let sources = root.join("sources");
    fs::create_dir_all(&sources).unwrap();
    fs::write(
        sources.join("alpha.txt"),
        "Delta Lake brings ACID transactions to data lakes.\n\nTime travel lets you query old snapshots.",
    )
    .unwrap();
    fs::write(
        sources.join("beta.txt"),
        "Unity Catalog governs tables, volumes and models from one place.",
    )
    .unwrap();

    let providers = match ollama_url {
        Some(url) => format!(
            r#"
[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = {}
url = "{}"
max_retries = 0

[llm]
provider = "ollama"
model = "llama3"
url = "{}"
max_retries = 0
"#,
            DIMS, url, url
        ),
        None => String::new(),
    };

    let config_content = format!(
        r#"[sources]
dir = "{}"
extension = "txt"

[index]
path = "{}"
{}"#,
        sources.display(),
        root.join("vector_db").display(),
        providers
    );

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("posts.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

async fn run_posts(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_posts"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .await
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[tokio::test]
async fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env(None);

    let (stdout, stderr, success) = run_posts(&config_path, &["init"]).await;
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(stdout.contains("linkedin_posts"));

    let (_, _, success) = run_posts(&config_path, &["init"]).await;
    assert!(success, "second init failed");
}

#[tokio::test]
async fn test_update_is_incremental() {
    let server = mock_ollama().await;
    let (tmp, config_path) = setup_test_env(Some(&server.uri()));

    let (stdout, stderr, success) = run_posts(&config_path, &["update"]).await;
    assert!(success, "update failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents processed: 2"), "got: {}", stdout);

    let (stdout, _, _) = run_posts(&config_path, &["update"]).await;
    assert!(stdout.contains("documents processed: 0"), "got: {}", stdout);

    fs::write(
        tmp.path().join("sources/beta.txt"),
        "Unity Catalog governs tables, volumes, models and functions.",
    )
    .unwrap();
    let (stdout, _, _) = run_posts(&config_path, &["update"]).await;
    assert!(stdout.contains("documents processed: 1"), "got: {}", stdout);
    assert!(stdout.contains("beta.txt"));

    let store = fs::read_to_string(tmp.path().join("vector_db/hash_store.txt")).unwrap();
    assert_eq!(store.lines().count(), 2);
}

#[tokio::test]
async fn test_status_lists_fingerprinted_files() {
    let server = mock_ollama().await;
    let (_tmp, config_path) = setup_test_env(Some(&server.uri()));

    run_posts(&config_path, &["update"]).await;
    let (stdout, _, success) = run_posts(&config_path, &["status"]).await;
    assert!(success);
    assert!(stdout.contains("collection: linkedin_posts"));
    assert!(stdout.contains("files processed: 2"));
    assert!(stdout.contains("alpha.txt"));
    assert!(stdout.contains("beta.txt"));
}

#[tokio::test]
async fn test_search_returns_indexed_chunks() {
    let server = mock_ollama().await;
    let (_tmp, config_path) = setup_test_env(Some(&server.uri()));

    run_posts(&config_path, &["update"]).await;
    let (stdout, _, success) = run_posts(&config_path, &["search", "catalog", "--k", "5"]).await;
    assert!(success);
    assert!(stdout.contains("alpha.txt") || stdout.contains("beta.txt"), "got: {}", stdout);
}

#[tokio::test]
async fn test_generate_prints_each_post() {
    let server = mock_ollama().await;
    let (_tmp, config_path) = setup_test_env(Some(&server.uri()));

    let (stdout, stderr, success) = run_posts(&config_path, &["generate", "--count", "2"]).await;
    assert!(success, "generate failed: stdout={}, stderr={}", stdout, stderr);
    assert_eq!(stdout.matches("Ship small, ship often.").count(), 2);
    assert!(stdout.contains("---"));
}

#[tokio::test]
async fn test_generate_rejects_zero_posts() {
    let server = mock_ollama().await;
    let (_tmp, config_path) = setup_test_env(Some(&server.uri()));

    let (_, stderr, success) = run_posts(&config_path, &["generate", "--count", "0"]).await;
    assert!(!success);
    assert!(stderr.contains("between 1 and 10"), "got: {}", stderr);
}

#[tokio::test]
async fn test_update_without_embedder_fails_and_records_nothing() {
    let (tmp, config_path) = setup_test_env(None);

    let (_, stderr, success) = run_posts(&config_path, &["update"]).await;
    assert!(!success);
    assert!(stderr.contains("disabled"), "got: {}", stderr);
    assert!(!tmp.path().join("vector_db/hash_store.txt").exists());
}
