use std::io::Cursor;

use async_trait::async_trait;

use super::{ExtractionResult, TextExtractor};
use crate::error::ExtractionError;

/// Local OCR through libtesseract.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    languages: String,
}

impl TesseractEngine {
    pub fn new(languages: &[String]) -> Result<Self, ExtractionError> {
        let languages = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };
        Ok(Self { languages })
    }

    fn recognize(languages: &str, image: &[u8]) -> Result<ExtractionResult, ExtractionError> {
        let _span = tracing::info_span!("ocr.tesseract").entered();

        let img = image::load_from_memory(image)
            .map_err(|e| ExtractionError::ImageDecode(e.to_string()))?;

        let mut png_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
            .map_err(|e| ExtractionError::ImageDecode(e.to_string()))?;

        let mut lt = leptess::LepTess::new(None, languages).map_err(|e| {
            ExtractionError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
        })?;
        lt.set_image_from_mem(&png_data)
            .map_err(|e| ExtractionError::OcrFailed(format!("Failed to set image: {}", e)))?;

        let text = lt
            .get_utf8_text()
            .map_err(|e| ExtractionError::OcrFailed(e.to_string()))?;
        let confidence = lt.mean_text_conf() as f32;

        Ok(ExtractionResult::new(text, confidence))
    }
}

#[async_trait]
impl TextExtractor for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn extract_text(&self, image: &[u8]) -> Result<ExtractionResult, ExtractionError> {
        let languages = self.languages.clone();
        let image = image.to_vec();
        tokio::task::spawn_blocking(move || Self::recognize(&languages, &image))
            .await
            .map_err(|e| ExtractionError::OcrFailed(format!("OCR task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_languages_joined() {
        let engine = TesseractEngine::new(&["eng".to_string(), "sqi".to_string()]).unwrap();
        assert_eq!(engine.languages, "eng+sqi");
    }

    #[tokio::test]
    async fn test_invalid_image_is_decode_error() {
        let engine = TesseractEngine::new(&[]).unwrap();
        let result = engine.extract_text(b"not an image").await;
        assert!(matches!(result, Err(ExtractionError::ImageDecode(_))));
    }
}
