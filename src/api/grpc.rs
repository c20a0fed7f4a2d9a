//! gRPC service implementation

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{error, info};

use crate::engine::ClassEntry;
use crate::error::EngineError;
use crate::service::DetectionService;

use super::request_id;

// Include generated protobuf code
pub mod proto {
    tonic::include_proto!("detection");
}

use proto::detection_service_server::{DetectionService as GrpcDetectionService, DetectionServiceServer};
use proto::*;

/// Maximum encoded message size in either direction.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// gRPC service implementation
pub struct GrpcHandler {
    service: Arc<DetectionService>,
}

impl GrpcHandler {
    pub fn new(service: Arc<DetectionService>) -> Self {
        Self { service }
    }

    pub fn into_server(self) -> DetectionServiceServer<Self> {
        DetectionServiceServer::new(self)
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE)
    }
}

/// Wire value 0 (or below) means "server default".
fn threshold(value: f32) -> Option<f32> {
    (value > 0.0).then_some(value)
}

fn to_status(err: EngineError) -> Status {
    match err {
        EngineError::NotLoaded => Status::unavailable(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl GrpcDetectionService for GrpcHandler {
    async fn detect(
        &self,
        request: Request<DetectRequest>,
    ) -> Result<Response<DetectResponse>, Status> {
        let req = request.into_inner();
        let request_id = request_id();

        info!(
            "[{}] Detection request from device: {}, image size: {} bytes",
            request_id,
            req.device_id,
            req.image.len()
        );

        let result = self
            .service
            .detect(req.image, threshold(req.confidence_threshold), threshold(req.iou_threshold))
            .await
            .map_err(|e| {
                error!("[{}] Detection failed: {}", request_id, e);
                to_status(e)
            })?;

        info!(
            "[{}] Found {} detections in {:.1}ms (model {})",
            request_id,
            result.detections.len(),
            result.inference_time_ms,
            result.model_version
        );

        let detections = result
            .detections
            .into_iter()
            .map(|d| Detection {
                class_name: d.class_name,
                external_id: d.external_id,
                class_id: d.class_id,
                confidence: d.confidence,
                bbox: Some(BoundingBox {
                    x1: d.bbox.x1,
                    y1: d.bbox.y1,
                    x2: d.bbox.x2,
                    y2: d.bbox.y2,
                }),
            })
            .collect();

        Ok(Response::new(DetectResponse {
            detections,
            model_version: result.model_version,
            inference_time_ms: result.inference_time_ms as f32,
            request_id,
        }))
    }

    async fn health_check(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<HealthResponse>, Status> {
        let health = self.service.health();

        Ok(Response::new(HealthResponse {
            healthy: health.healthy,
            status: health.status,
            model_loaded: health.model_loaded,
            uptime_seconds: health.uptime_seconds as i64,
        }))
    }

    async fn get_model_info(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ModelInfo>, Status> {
        let info = self.service.model_info();
        let size = info.input_size as i32;

        // Training metadata is not carried by model artifacts.
        Ok(Response::new(ModelInfo {
            version: info.version,
            architecture: info.architecture,
            class_names: info.class_names,
            input_width: size,
            input_height: size,
            trained_at: String::new(),
            map50: 0.0,
            map50_95: 0.0,
        }))
    }

    async fn sync_classes(
        &self,
        request: Request<SyncClassesRequest>,
    ) -> Result<Response<SyncClassesResponse>, Status> {
        let entries = request
            .into_inner()
            .classes
            .into_iter()
            .map(|c| ClassEntry {
                class_id: c.class_id,
                external_id: c.external_id,
                display_name: c.display_name,
            })
            .collect();

        let result = self.service.sync_classes(entries);
        info!("Synced {} classes from catalog", result.class_count);

        Ok(Response::new(SyncClassesResponse {
            success: result.success,
            class_count: result.class_count as i32,
        }))
    }
}
