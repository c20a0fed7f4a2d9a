//! REST API request/response data transfer objects

use serde::{Deserialize, Serialize};

/// Detect query parameters (image comes as multipart)
#[derive(Debug, Default, Deserialize)]
pub struct DetectQuery {
    pub confidence_threshold: Option<f32>,
    pub iou_threshold: Option<f32>,
    pub device_id: Option<String>,
}

/// Detect response
#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub detections: Vec<DetectionDto>,
    pub model_version: String,
    pub inference_time_ms: f64,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct DetectionDto {
    pub class_id: i32,
    pub class_name: String,
    pub external_id: String,
    pub confidence: f32,
    pub bbox: BoundingBoxDto,
}

#[derive(Debug, Serialize)]
pub struct BoundingBoxDto {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Model info response
#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    pub version: String,
    pub architecture: String,
    pub class_names: Vec<String>,
    pub input_width: u32,
    pub input_height: u32,
    pub loaded_at: Option<String>,
}

/// Class sync request
#[derive(Debug, Deserialize)]
pub struct SyncClassesRequest {
    pub classes: Vec<ClassMappingDto>,
}

#[derive(Debug, Deserialize)]
pub struct ClassMappingDto {
    pub class_id: i32,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub display_name: String,
}

/// Class sync response
#[derive(Debug, Serialize)]
pub struct SyncClassesResponse {
    pub success: bool,
    pub class_count: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}
