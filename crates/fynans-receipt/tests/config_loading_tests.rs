//! Config files on disk and environment overrides.

mod common;

use common::ConfigBuilder;
use fynans_receipt::config::{apply_env_overrides, load_config, OcrEngineKind, QueueStoreKind};
use fynans_receipt::ConfigError;
use serial_test::serial;

const ENV_VARS: &[&str] = &[
    "OLLAMA_SERVICE_URL",
    "OLLAMA_MODEL",
    "OLLAMA_TIMEOUT",
    "OCR_ENGINE",
    "OCR_SERVICE_URL",
    "RECEIPT_WORKER_COUNT",
    "RECEIPT_DB_PATH",
];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

fn write_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.json");
    std::fs::write(&path, contents).expect("Failed to write config file");
    path
}

#[test]
fn test_serialized_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let builder = ConfigBuilder::new()
        .sqlite("/var/lib/fynans/receipts.db")
        .max_attempts(5)
        .workers(3);
    let path = write_config(&dir, &builder.to_json());

    let config = load_config(&path).unwrap();
    assert_eq!(config.queue.store, QueueStoreKind::Sqlite);
    assert_eq!(
        config.queue.database_path.as_deref(),
        Some("/var/lib/fynans/receipts.db")
    );
    assert_eq!(config.queue.max_attempts, 5);
    assert_eq!(config.queue.backoff_base_ms, 10);
    assert_eq!(config.worker.count, 3);
    assert_eq!(config.progress.stages.len(), 5);
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, r#"{ "llm": { "model": "llama3.2" } }"#);

    let config = load_config(&path).unwrap();
    assert_eq!(config.llm.model, "llama3.2");
    assert_eq!(config.llm.service_url, "http://localhost:11434");
    assert_eq!(config.ocr.engine, OcrEngineKind::Http);
    assert_eq!(config.queue.store, QueueStoreKind::Memory);
}

#[test]
fn test_schema_violation_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, r#"{ "queue": { "maxAttempts": 0 } }"#);

    let err = load_config(&path).unwrap_err();
    assert!(matches!(err, ConfigError::SchemaValidation { .. }));
}

#[test]
fn test_malformed_json_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "{ \"version\": ");

    let err = load_config(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ParseJson(_)));
}

#[test]
#[serial]
fn test_env_overrides_apply() {
    clear_env();
    std::env::set_var("OLLAMA_MODEL", "mistral");
    std::env::set_var("OLLAMA_TIMEOUT", "30000");
    std::env::set_var("OCR_ENGINE", "tesseract");
    std::env::set_var("RECEIPT_WORKER_COUNT", "2");
    std::env::set_var("RECEIPT_DB_PATH", "/tmp/fynans-test.db");

    let mut config = ConfigBuilder::new().build();
    let result = apply_env_overrides(&mut config);
    clear_env();
    result.unwrap();

    assert_eq!(config.llm.model, "mistral");
    assert_eq!(config.llm.timeout_ms, 30_000);
    assert_eq!(config.ocr.engine, OcrEngineKind::Tesseract);
    assert_eq!(config.worker.count, 2);
    assert_eq!(config.queue.database_path.as_deref(), Some("/tmp/fynans-test.db"));
}

#[test]
#[serial]
fn test_invalid_env_number_is_rejected() {
    clear_env();
    std::env::set_var("RECEIPT_WORKER_COUNT", "many");

    let mut config = ConfigBuilder::new().build();
    let result = apply_env_overrides(&mut config);
    clear_env();

    assert!(matches!(
        result,
        Err(ConfigError::InvalidEnv { ref name, .. }) if name == "RECEIPT_WORKER_COUNT"
    ));
}

#[test]
#[serial]
fn test_zero_workers_from_env_fails_validation() {
    clear_env();
    std::env::set_var("RECEIPT_WORKER_COUNT", "0");

    let mut config = ConfigBuilder::new().build();
    let result = apply_env_overrides(&mut config);
    clear_env();

    assert!(matches!(result, Err(ConfigError::Validation { .. })));
}
