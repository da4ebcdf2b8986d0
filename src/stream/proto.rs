use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecognizedFaceMsg {
    pub name: String,
    pub confidence: f64,
}

/// Computer-vision annotations attached to a processed frame.
///
/// `density_zones` is a grid of per-zone person counts. Rows are not
/// guaranteed to share a length.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CvMetadataMsg {
    pub person_count: u32,
    #[serde(default)]
    pub density_zones: Vec<Vec<u32>>,
    pub is_crowd: bool,
    pub is_high_density: bool,
    #[serde(default)]
    pub recognized_faces: Vec<RecognizedFaceMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartStream {
        url: String,
        fps: u32,
        quality: u32,
        resize_factor: f64,
        cv_processing_resize: f64,
    },
    StopStream,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Frame {
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fps_target: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<CvMetadataMsg>,
    },
    Status {
        message: String,
    },
    Error {
        message: String,
    },
}

impl ClientMessage {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
