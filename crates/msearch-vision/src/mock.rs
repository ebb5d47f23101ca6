//! Deterministic mock vision capability for tests and local development
//! without a real backend configured.

use std::path::Path;

use async_trait::async_trait;

use msearch_models::VisualAnalysis;

use crate::error::VisionResult;
use crate::VisionCapability;

pub struct MockVisionCapability {
    model_name: String,
    model_version: String,
}

impl MockVisionCapability {
    pub fn new() -> Self {
        Self {
            model_name: "mock".to_string(),
            model_version: "0".to_string(),
        }
    }
}

impl Default for MockVisionCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisionCapability for MockVisionCapability {
    async fn analyze(&self, _image_path: &Path) -> VisionResult<VisualAnalysis> {
        Ok(VisualAnalysis {
            description: Some("A placeholder description.".to_string()),
            tags: vec![],
            ocr_text: None,
            model_name: Some(self.model_name.clone()),
            model_version: Some(self.model_version.clone()),
        })
    }

    async fn refine(&self, _image_path: &Path, existing: &VisualAnalysis) -> VisionResult<VisualAnalysis> {
        Ok(VisualAnalysis {
            ocr_text: existing.ocr_text.clone().or_else(|| Some(String::new())),
            ..existing.clone()
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn analyze_returns_placeholder_description() {
        let vision = MockVisionCapability::new();
        let result = vision.analyze(Path::new("/dev/null")).await.unwrap();
        assert_eq!(result.description.as_deref(), Some("A placeholder description."));
    }
}
