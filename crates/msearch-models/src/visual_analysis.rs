use serde::{Deserialize, Serialize};

/// The semi-structured result of running a vision model against one image
/// (an asset's proxy, or a scene's representative frame).
///
/// Stored as a JSONB column both at the asset level (`asset.visual_analysis`)
/// and nested under a `moondream` key inside `video_scenes.metadata`. The
/// field names here are the only ones a decoder-specific vision backend is
/// allowed to surface; anything else it returns stays inside the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

/// Per-scene metadata document: `{moondream: VisualAnalysis, showinfo: "..",
/// semantic_duplicate: bool}`. Only `moondream` and `semantic_duplicate` are
/// read by the search layer; `showinfo` is carried through opaquely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moondream: Option<VisualAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub showinfo: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub semantic_duplicate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visual_analysis_round_trips_through_json() {
        let va = VisualAnalysis {
            description: Some("a red car".into()),
            tags: vec!["car".into(), "red".into()],
            ocr_text: None,
            model_name: Some("moondream2".into()),
            model_version: Some("2025-01".into()),
        };
        let json = serde_json::to_value(&va).unwrap();
        let back: VisualAnalysis = serde_json::from_value(json).unwrap();
        assert_eq!(va, back);
    }

    #[test]
    fn scene_metadata_nests_visual_analysis_under_moondream() {
        let raw = serde_json::json!({
            "moondream": {"description": "a placeholder description.", "tags": []},
            "showinfo": "n:1 pts:0",
        });
        let meta: SceneMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(
            meta.moondream.unwrap().description.as_deref(),
            Some("a placeholder description.")
        );
        assert!(!meta.semantic_duplicate);
    }
}
