//! Replay scenarios
//!
//! A scenario is a JSON document listing frames in capture order together
//! with the scripted engine answer for each:
//!
//! ```json
//! {
//!   "frames": [
//!     {
//!       "id": "cam-0001",
//!       "captured_at_ms": 1700000000000,
//!       "width": 1280,
//!       "height": 720,
//!       "pixel_format": "nv21",
//!       "response": {
//!         "result": "detections",
//!         "latency_ms": 120,
//!         "detections": [{ "text": "ab 123", "confidence": 0.91 }]
//!       }
//!     },
//!     {
//!       "id": "cam-0002",
//!       "captured_at_ms": 1700000000400,
//!       "width": 1280,
//!       "height": 720,
//!       "pixel_format": "nv21",
//!       "response": { "result": "failure", "failure": "timeout", "latency_ms": 2000 }
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use lpr_common::model::Frame;
use serde::{Deserialize, Serialize};

use crate::engine::{ScriptedEngine, ScriptedResponse};
use crate::error::Result;

/// One frame and the engine's scripted answer for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFrame {
    #[serde(flatten)]
    pub frame: Frame,

    /// Missing means "no detections, no latency"
    #[serde(default)]
    pub response: ScriptedResponse,
}

/// Ordered frames for a replay run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub frames: Vec<ScenarioFrame>,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            lpr_common::Error::InvalidInput(format!("Invalid scenario: {}", e)).into()
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(lpr_common::Error::Io)?;
        Self::from_json(&json)
    }

    /// Engine that answers every frame of this scenario
    pub fn engine(&self) -> ScriptedEngine {
        let responses: HashMap<String, ScriptedResponse> = self
            .frames
            .iter()
            .map(|f| (f.frame.id.clone(), f.response.clone()))
            .collect();
        ScriptedEngine::with_responses(responses)
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().map(|f| &f.frame)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DetectOptions, InferenceEngine};
    use lpr_common::model::FailureKind;

    const SAMPLE: &str = r#"{
        "frames": [
            {
                "id": "a",
                "captured_at_ms": 1000,
                "width": 640,
                "height": 480,
                "pixel_format": "nv21",
                "location": { "latitude": 1.5, "longitude": 2.5 },
                "response": {
                    "result": "detections",
                    "latency_ms": 30,
                    "detections": [{ "text": "ab 123", "confidence": 0.9 }]
                }
            },
            {
                "id": "b",
                "captured_at_ms": 1400,
                "width": 640,
                "height": 480,
                "pixel_format": "jpeg",
                "response": { "result": "failure", "failure": "runtime" }
            },
            {
                "id": "c",
                "captured_at_ms": 1800,
                "width": 640,
                "height": 480,
                "pixel_format": "jpeg"
            }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let scenario = Scenario::from_json(SAMPLE).unwrap();
        assert_eq!(scenario.frames.len(), 3);
        assert_eq!(scenario.frames[0].frame.captured_at_ms, 1000);
        assert!(scenario.frames[0].frame.location.is_some());
        assert_eq!(
            scenario.frames[1].response,
            ScriptedResponse::failure(FailureKind::Runtime, 0)
        );
        assert_eq!(scenario.frames[2].response, ScriptedResponse::default());
    }

    #[test]
    fn test_invalid_json_is_invalid_input() {
        let err = Scenario::from_json("{ not json").unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Common(lpr_common::Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_engine_answers_from_scenario() {
        let scenario = Scenario::from_json(SAMPLE).unwrap();
        let engine = scenario.engine();
        let options = DetectOptions {
            max_detections: 8,
            ..Default::default()
        };

        let frames: Vec<Frame> = scenario.frames().cloned().collect();
        let found = engine.detect(&frames[0], &options).await.unwrap();
        assert_eq!(found[0].text, "ab 123");
        assert!(engine.detect(&frames[1], &options).await.is_err());
        assert!(engine.detect(&frames[2], &options).await.unwrap().is_empty());
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(Scenario::from_path(&path).unwrap().frames.len(), 3);

        assert!(Scenario::from_path(&dir.path().join("missing.json")).is_err());
    }
}
