use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReceiptError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Text extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Completion error: {0}")]
    Completion(#[from] crate::ai::CompletionError),

    #[error("Parse error: {0}")]
    Parse(#[from] crate::parser::ParseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::worker::QueueError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid value for environment variable '{name}': {reason}")]
    InvalidEnv { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("OCR service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("OCR service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("OCR timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("OCR engine '{0}' is not available in this build")]
    EngineUnavailable(String),
}

pub type Result<T> = std::result::Result<T, ReceiptError>;
