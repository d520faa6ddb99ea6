pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, apply_overrides_with, load_config, load_config_from_str, validate_config,
};
pub use schema::{
    default_stages, Config, LlmConfig, LogFormat, LoggingConfig, OcrConfig, OcrEngineKind,
    ParserConfig, ProgressConfig, QueueConfig, QueueStoreKind, StageWeight, WorkerConfig,
};
