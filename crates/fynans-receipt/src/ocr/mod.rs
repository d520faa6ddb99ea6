//! Text extraction from receipt images.
//!
//! The engine is chosen by `ocr.engine`: a network OCR service or a local
//! Tesseract engine (behind the `tesseract` feature).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{OcrConfig, OcrEngineKind};
use crate::error::ExtractionError;
use crate::secrets::SecretSource;

pub mod http;
#[cfg(feature = "tesseract")]
pub mod tesseract;
#[cfg(not(feature = "tesseract"))]
pub mod tesseract_stub;

pub use http::HttpOcrService;
#[cfg(feature = "tesseract")]
pub use tesseract::TesseractEngine;
#[cfg(not(feature = "tesseract"))]
pub use tesseract_stub::TesseractEngine;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,
    /// Engine confidence in [0, 1].
    pub confidence: f32,
}

impl ExtractionResult {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: normalize_confidence(confidence),
        }
    }
}

/// Engines report either a 0–1 ratio or a 0–100 percentage.
pub fn normalize_confidence(raw: f32) -> f32 {
    if !raw.is_finite() || raw < 0.0 {
        0.0
    } else if raw > 1.0 {
        (raw / 100.0).min(1.0)
    } else {
        raw
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;
    async fn extract_text(&self, image: &[u8]) -> Result<ExtractionResult, ExtractionError>;
}

pub fn build_extractor(config: &OcrConfig) -> Result<Arc<dyn TextExtractor>, ExtractionError> {
    match config.engine {
        OcrEngineKind::Http => {
            let api_key = SecretSource {
                direct: config.api_key.as_deref(),
                file: config.api_key_file.as_deref(),
                env_var: config.api_key_env_var.as_deref(),
            }
            .resolve()
            .map_err(|e| ExtractionError::OcrFailed(e.to_string()))?;
            Ok(Arc::new(HttpOcrService::new(config, api_key)?))
        }
        OcrEngineKind::Tesseract => Ok(Arc::new(TesseractEngine::new(&config.languages)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_confidence() {
        assert_eq!(normalize_confidence(0.87), 0.87);
        assert!((normalize_confidence(92.0) - 0.92).abs() < 1e-6);
        assert_eq!(normalize_confidence(-1.0), 0.0);
        assert_eq!(normalize_confidence(f32::NAN), 0.0);
        assert_eq!(normalize_confidence(250.0), 1.0);
    }

    #[test]
    fn test_build_http_extractor() {
        let config = OcrConfig::default();
        let extractor = build_extractor(&config).unwrap();
        assert_eq!(extractor.name(), "http");
    }
}
