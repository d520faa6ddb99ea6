use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Applies process environment overrides, then re-validates.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    apply_overrides_with(config, |name| std::env::var(name).ok())?;
    validate_config(config)
}

/// Applies overrides from an arbitrary variable lookup.
pub fn apply_overrides_with<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = get("OLLAMA_SERVICE_URL") {
        config.llm.service_url = url;
    }
    if let Some(model) = get("OLLAMA_MODEL") {
        config.llm.model = model;
    }
    if let Some(raw) = get("OLLAMA_TIMEOUT") {
        config.llm.timeout_ms = parse_number("OLLAMA_TIMEOUT", &raw)?;
    }
    if let Some(raw) = get("OCR_ENGINE") {
        config.ocr.engine = raw.parse().map_err(|reason| ConfigError::InvalidEnv {
            name: "OCR_ENGINE".to_string(),
            reason,
        })?;
    }
    if let Some(url) = get("OCR_SERVICE_URL") {
        config.ocr.service_url = url;
    }
    if let Some(raw) = get("RECEIPT_WORKER_COUNT") {
        config.worker.count = parse_number("RECEIPT_WORKER_COUNT", &raw)?;
    }
    if let Some(path) = get("RECEIPT_DB_PATH") {
        config.queue.database_path = Some(path);
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnv {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.progress.stages.is_empty() {
        return Err(ConfigError::Validation {
            message: "At least one progress stage is required".to_string(),
        });
    }
    let mut names = HashSet::new();
    for stage in &config.progress.stages {
        if !(stage.weight > 0.0 && stage.weight.is_finite()) {
            return Err(ConfigError::Validation {
                message: format!("Stage '{}' must have a positive weight", stage.name),
            });
        }
        if !names.insert(stage.name.as_str()) {
            return Err(ConfigError::Validation {
                message: format!("Duplicate progress stage '{}'", stage.name),
            });
        }
    }

    let cap = config.progress.token_cap;
    if !(cap > 0.0 && cap < 1.0) {
        return Err(ConfigError::Validation {
            message: format!("Token cap must be within (0, 1), got {}", cap),
        });
    }

    let tolerance = config.parser.cross_check_tolerance;
    if !(0.0..=1.0).contains(&tolerance) {
        return Err(ConfigError::Validation {
            message: format!("Cross-check tolerance must be within [0, 1], got {}", tolerance),
        });
    }

    if config.queue.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "queue.maxAttempts must be at least 1".to_string(),
        });
    }

    if config.worker.count == 0 {
        return Err(ConfigError::Validation {
            message: "worker.count must be at least 1".to_string(),
        });
    }

    if config.llm.timeout_ms == 0 {
        return Err(ConfigError::Validation {
            message: "llm.timeoutMs must be positive".to_string(),
        });
    }

    Ok(())
}
