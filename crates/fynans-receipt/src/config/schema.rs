use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            logging: LoggingConfig::default(),
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
            parser: ParserConfig::default(),
            progress: ProgressConfig::default(),
            queue: QueueConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

// ── Logging ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ── Text extraction ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineKind {
    #[default]
    Http,
    Tesseract,
}

impl std::str::FromStr for OcrEngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "paddle" | "paddleocr" => Ok(OcrEngineKind::Http),
            "tesseract" => Ok(OcrEngineKind::Tesseract),
            other => Err(format!("unknown OCR engine '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrConfig {
    #[serde(default)]
    pub engine: OcrEngineKind,
    #[serde(default = "default_ocr_url")]
    pub service_url: String,
    #[serde(default = "default_ocr_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
}

fn default_ocr_url() -> String {
    "http://localhost:8866".to_string()
}

fn default_ocr_timeout_ms() -> u64 {
    60_000
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string(), "sqi".to_string()]
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: OcrEngineKind::default(),
            service_url: default_ocr_url(),
            timeout_ms: default_ocr_timeout_ms(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: None,
            languages: default_languages(),
        }
    }
}

// ── Completion model ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub service_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "qwen2.5:3b".to_string()
}

fn default_llm_timeout_ms() -> u64 {
    120_000
}

fn default_health_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            service_url: default_llm_url(),
            model: default_model(),
            timeout_ms: default_llm_timeout_ms(),
            health_timeout_ms: default_health_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            temperature: default_temperature(),
        }
    }
}

// ── Parsing ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParserConfig {
    /// Relative tolerance between the item sum and the declared total.
    #[serde(default = "default_tolerance")]
    pub cross_check_tolerance: f64,
    #[serde(default = "default_parse_tokens")]
    pub parse_expected_tokens: u32,
    #[serde(default = "default_normalize_tokens")]
    pub normalize_expected_tokens: u32,
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default = "default_context_items")]
    pub prompt_context_items: usize,
}

fn default_tolerance() -> f64 {
    0.1
}

fn default_parse_tokens() -> u32 {
    600
}

fn default_normalize_tokens() -> u32 {
    500
}

fn default_true() -> bool {
    true
}

fn default_context_items() -> usize {
    50
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            cross_check_tolerance: default_tolerance(),
            parse_expected_tokens: default_parse_tokens(),
            normalize_expected_tokens: default_normalize_tokens(),
            normalize: true,
            prompt_context_items: default_context_items(),
        }
    }
}

// ── Progress ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageWeight {
    pub name: String,
    pub weight: f64,
}

impl StageWeight {
    pub fn new(name: &str, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            weight,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressConfig {
    #[serde(default = "default_stages")]
    pub stages: Vec<StageWeight>,
    /// Fraction of a stage's range that token progress may reach.
    #[serde(default = "default_token_cap")]
    pub token_cap: f64,
}

pub fn default_stages() -> Vec<StageWeight> {
    vec![
        StageWeight::new("ocr", 5.0),
        StageWeight::new("context", 1.0),
        StageWeight::new("llm-parse", 45.0),
        StageWeight::new("llm-normalize", 35.0),
        StageWeight::new("enrich", 4.0),
    ]
}

fn default_token_cap() -> f64 {
    0.95
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            token_cap: default_token_cap(),
        }
    }
}

// ── Queue ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueStoreKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    #[serde(default)]
    pub store: QueueStoreKind,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2_000
}

fn default_retention_secs() -> u64 {
    86_400
}

fn default_event_capacity() -> usize {
    256
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store: QueueStoreKind::default(),
            database_path: None,
            max_attempts: default_attempts(),
            backoff_base_ms: default_backoff_ms(),
            retention_secs: default_retention_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

// ── Worker ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
}

fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_janitor_interval_secs() -> u64 {
    600
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            janitor_interval_secs: default_janitor_interval_secs(),
        }
    }
}
