use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ExtractionResult, TextExtractor};
use crate::config::OcrConfig;
use crate::error::ExtractionError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct OcrRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: f32,
}

/// Client for a network OCR service exposing `POST /ocr`.
pub struct HttpOcrService {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    api_key: Option<SecretString>,
}

impl HttpOcrService {
    pub fn new(config: &OcrConfig, api_key: Option<SecretString>) -> Result<Self, ExtractionError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/ocr", config.service_url.trim_end_matches('/')),
            timeout,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TextExtractor for HttpOcrService {
    fn name(&self) -> &str {
        "http"
    }

    async fn extract_text(&self, image: &[u8]) -> Result<ExtractionResult, ExtractionError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&OcrRequest { image: &encoded });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExtractionError::Timeout(self.timeout)
            } else {
                ExtractionError::Request(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OcrResponse = response.json().await?;
        tracing::debug!(
            chars = parsed.text.len(),
            confidence = parsed.confidence,
            "OCR service returned text"
        );
        Ok(ExtractionResult::new(parsed.text, parsed.confidence))
    }
}
