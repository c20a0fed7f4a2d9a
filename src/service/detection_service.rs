//! Detection Service - shared by the gRPC and REST fronts
//!
//! Moves blocking decode/inference onto the blocking pool, bounded by a
//! worker semaphore.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tokio::sync::Semaphore;

use crate::engine::{ClassEntry, ClassMapping, DetectionEngine, InferenceResult, ModelInfo};
use crate::error::{EngineError, EngineResult};

use super::types::*;

pub struct DetectionService {
    engine: Arc<DetectionEngine>,
    workers: Arc<Semaphore>,
    start_time: Instant,
}

impl DetectionService {
    /// Create a service allowing `max_workers` concurrent inferences.
    pub fn new(engine: Arc<DetectionEngine>, max_workers: usize) -> Self {
        Self {
            engine,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            start_time: Instant::now(),
        }
    }

    pub fn engine(&self) -> &Arc<DetectionEngine> {
        &self.engine
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Detect objects in an encoded image
    pub async fn detect(
        &self,
        image_data: Vec<u8>,
        confidence_threshold: Option<f32>,
        iou_threshold: Option<f32>,
    ) -> EngineResult<InferenceResult> {
        // Don't hold a worker slot just to learn there is nothing to run.
        if !self.engine.is_loaded() {
            return Err(EngineError::NotLoaded);
        }

        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::Inference(e.into()))?;

        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.detect(&image_data, confidence_threshold, iou_threshold))
            .await
            .map_err(|e| EngineError::Inference(anyhow!("detection task failed: {}", e)))?
    }

    /// Reload the model off the async runtime.
    pub async fn reload(&self) -> bool {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.reload())
            .await
            .unwrap_or(false)
    }

    pub fn health(&self) -> HealthResult {
        let model_loaded = self.engine.is_loaded();
        let status = if model_loaded {
            STATUS_HEALTHY
        } else {
            STATUS_MODEL_NOT_LOADED
        };

        HealthResult {
            healthy: model_loaded,
            status: status.to_string(),
            model_loaded,
            uptime_seconds: self.uptime().as_secs(),
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        self.engine.model_info()
    }

    /// Replace the class mapping with `entries`. All or nothing.
    pub fn sync_classes(&self, entries: Vec<ClassEntry>) -> SyncResult {
        let mapping: ClassMapping = entries.into_iter().collect();
        let class_count = mapping.len();
        self.engine.update_class_mapping(mapping);

        SyncResult {
            success: true,
            class_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::engine::backend::fake::{png_bytes, raw, write_model, FakeLoader};

    fn service(dir: &tempfile::TempDir) -> DetectionService {
        let config = ModelConfig {
            model_dir: dir.path().to_path_buf(),
            input_size: 32,
            ..ModelConfig::default()
        };
        let loader = FakeLoader::with_detections(vec![raw(0, 0.95, [0.0, 0.0, 5.0, 5.0])]);
        DetectionService::new(Arc::new(DetectionEngine::new(config, Arc::new(loader))), 2)
    }

    fn entries() -> Vec<ClassEntry> {
        vec![
            ClassEntry {
                class_id: 0,
                external_id: "sku-001".to_string(),
                display_name: "Coca-Cola".to_string(),
            },
            ClassEntry {
                class_id: 1,
                external_id: "sku-002".to_string(),
                display_name: "Sprite".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_health_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);

        let health = service.health();
        assert!(!health.healthy);
        assert!(!health.model_loaded);
        assert_eq!(health.status, STATUS_MODEL_NOT_LOADED);

        let err = service.detect(png_bytes(8, 8), None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::NotLoaded));
    }

    #[tokio::test]
    async fn test_reload_then_detect() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);
        write_model(&service.engine().model_path(), "cola,sprite", 1_000);

        assert!(service.reload().await);
        assert_eq!(service.health().status, STATUS_HEALTHY);

        let result = service.detect(png_bytes(10, 10), None, None).await.unwrap();
        assert_eq!(result.detections[0].class_name, "cola");
        assert_eq!(result.model_version, "v1000");
    }

    #[tokio::test]
    async fn test_sync_classes_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);

        let first = service.sync_classes(entries());
        let mapping_after_first = service.engine().class_mapping();
        let second = service.sync_classes(entries());

        assert_eq!(first, second);
        assert_eq!(first.class_count, 2);
        assert_eq!(*mapping_after_first, *service.engine().class_mapping());
    }
}
