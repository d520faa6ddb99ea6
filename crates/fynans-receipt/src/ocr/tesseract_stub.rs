//! Stand-in used when the crate is built without the `tesseract` feature.

use async_trait::async_trait;

use super::{ExtractionResult, TextExtractor};
use crate::error::ExtractionError;

#[derive(Debug, Clone)]
pub struct TesseractEngine;

impl TesseractEngine {
    pub fn new(_languages: &[String]) -> Result<Self, ExtractionError> {
        Err(ExtractionError::EngineUnavailable("tesseract".to_string()))
    }
}

#[async_trait]
impl TextExtractor for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn extract_text(&self, _image: &[u8]) -> Result<ExtractionResult, ExtractionError> {
        Err(ExtractionError::EngineUnavailable("tesseract".to_string()))
    }
}
