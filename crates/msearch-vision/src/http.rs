//! HTTP-backed vision capability: posts a base64-encoded image plus a
//! prompt to a configured endpoint and parses a JSON response into
//! [`VisualAnalysis`]. The request/response shape and error handling mirror
//! the teacher crate's Gemini client (`reqwest::Client::post(...).json(...)`,
//! status-check before body parse, markdown-fence stripping before JSON
//! decode) generalized from "video highlights" to "single-image analysis".

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use msearch_models::VisualAnalysis;

use crate::error::{VisionError, VisionResult};
use crate::VisionCapability;

const ANALYZE_PROMPT: &str = "Describe this image in one sentence, list a handful of short tags, \
and transcribe any visible text verbatim. Respond as JSON: \
{\"description\": string, \"tags\": [string], \"ocr_text\": string|null}.";

const REFINE_PROMPT: &str = "Re-examine this image focusing on any visible text. Respond as JSON \
with the same shape as before, replacing ocr_text with a more thorough transcription.";

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    prompt: &'a str,
    image_base64: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    ocr_text: Option<String>,
}

/// A vision capability backed by an HTTP endpoint speaking a small
/// JSON-in/JSON-out protocol: `POST {endpoint} {prompt, image_base64} ->
/// {description, tags, ocr_text}`. This is deliberately generic rather than
/// tied to one vendor's API shape, since spec.md treats the model itself as
/// an external black box.
pub struct HttpVisionCapability {
    endpoint: String,
    client: Client,
    model_name: String,
    model_version: String,
}

impl HttpVisionCapability {
    pub fn new(endpoint: impl Into<String>, model_name: impl Into<String>, model_version: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: Client::new(),
            model_name: model_name.into(),
            model_version: model_version.into(),
        }
    }

    async fn call(&self, image_path: &Path, prompt: &str) -> VisionResult<VisualAnalysis> {
        let bytes = tokio::fs::read(image_path).await?;
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(&bytes);

        debug!(endpoint = %self.endpoint, path = %image_path.display(), "calling vision backend");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&AnalyzeRequest { prompt, image_base64 })
            .send()
            .await
            .map_err(|e| VisionError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, "vision backend returned an error");
            return Err(VisionError::BackendError { status, body });
        }

        let text = response
            .text()
            .await
            .map_err(|e| VisionError::InvalidResponse(e.to_string()))?;
        let parsed: AnalyzeResponse = serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| VisionError::InvalidResponse(e.to_string()))?;

        Ok(VisualAnalysis {
            description: parsed.description,
            tags: parsed.tags,
            ocr_text: parsed.ocr_text,
            model_name: Some(self.model_name.clone()),
            model_version: Some(self.model_version.clone()),
        })
    }
}

#[async_trait]
impl VisionCapability for HttpVisionCapability {
    async fn analyze(&self, image_path: &Path) -> VisionResult<VisualAnalysis> {
        self.call(image_path, ANALYZE_PROMPT).await
    }

    async fn refine(&self, image_path: &Path, existing: &VisualAnalysis) -> VisionResult<VisualAnalysis> {
        let refined = self.call(image_path, REFINE_PROMPT).await?;
        Ok(VisualAnalysis {
            description: refined.description.or_else(|| existing.description.clone()),
            tags: if refined.tags.is_empty() {
                existing.tags.clone()
            } else {
                refined.tags
            },
            ocr_text: refined.ocr_text.or_else(|| existing.ocr_text.clone()),
            model_name: refined.model_name,
            model_version: refined.model_version,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text.strip_prefix("```json").unwrap_or(text);
    let text = text.strip_prefix("```").unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fence_removes_json_fence() {
        let input = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_code_fence(input), "{\"a\":1}");
    }

    #[test]
    fn strip_code_fence_leaves_plain_json_alone() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
    }
}
