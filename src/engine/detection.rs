//! Detection engine
//!
//! Owns the current model handle and the class mapping overlay. Both live
//! in slots holding an `Arc` snapshot: readers clone the `Arc` once at the
//! start of a call and never look at the slot again, writers replace the
//! whole `Arc`. A reload therefore never changes the model or labels a
//! running `detect` sees.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::backend::{ModelLoader, PredictParams};
use super::handle::ModelHandle;
use super::mapping::ClassMapping;
use super::preprocess::{decode_rgb, NormalizedBox};
use crate::config::ModelConfig;
use crate::error::{EngineError, EngineResult, LoadError};

/// Sentinel reported by `model_info` before any model is installed.
pub const NO_MODEL: &str = "none";

/// One detection, labelled and normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: i32,
    pub class_name: String,
    pub external_id: String,
    pub confidence: f32,
    pub bbox: NormalizedBox,
}

#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Model output order.
    pub detections: Vec<Detection>,
    pub inference_time_ms: f64,
    pub model_version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub version: String,
    pub architecture: String,
    pub class_names: Vec<String>,
    pub input_size: u32,
    pub loaded: bool,
}

pub struct DetectionEngine {
    config: ModelConfig,
    loader: Arc<dyn ModelLoader>,
    current: RwLock<Option<Arc<ModelHandle>>>,
    mapping: RwLock<Arc<ClassMapping>>,
    reload_lock: Mutex<()>,
}

impl DetectionEngine {
    /// Create an engine with no model installed.
    pub fn new(config: ModelConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            config,
            loader,
            current: RwLock::new(None),
            mapping: RwLock::new(Arc::new(ClassMapping::new())),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.config.model_path()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Snapshot of the installed handle.
    pub fn current(&self) -> Option<Arc<ModelHandle>> {
        self.current.read().clone()
    }

    /// Snapshot of the class mapping overlay.
    pub fn class_mapping(&self) -> Arc<ClassMapping> {
        self.mapping.read().clone()
    }

    /// Load the configured model file and install it on success.
    ///
    /// Returns `false` (and keeps whatever was installed) when the file is
    /// missing or broken. Reloads are serialized; `detect` calls are never
    /// blocked by the load itself.
    pub fn reload(&self) -> bool {
        let _guard = self.reload_lock.lock();
        let path = self.model_path();

        let warmup = self.predict_params(None, None);
        match ModelHandle::load(self.loader.as_ref(), &path, self.config.input_size, warmup) {
            Ok(handle) => {
                let handle = Arc::new(handle);
                info!(
                    "Installing model {} ({}), classes: {:?}",
                    handle.version(),
                    handle.modified_at().to_rfc3339(),
                    handle.class_names()
                );
                let previous = self.current.write().replace(handle);
                if let Some(previous) = previous {
                    debug!("Superseded model {}", previous.version());
                }
                true
            }
            Err(LoadError::NotFound(path)) => {
                warn!("Model file not found: {}", path.display());
                false
            }
            Err(e) => {
                error!("Failed to load model: {}", e);
                false
            }
        }
    }

    /// Replace the overlay. Applies to every `detect` that starts afterwards.
    pub fn update_class_mapping(&self, mapping: ClassMapping) {
        let count = mapping.len();
        *self.mapping.write() = Arc::new(mapping);
        info!("Updated class mapping with {} classes", count);
    }

    /// Run detection on an encoded image.
    ///
    /// Thresholds that are absent or non-positive fall back to the
    /// configured defaults. Boxes are normalized against the original image.
    pub fn detect(
        &self,
        image_data: &[u8],
        confidence_threshold: Option<f32>,
        iou_threshold: Option<f32>,
    ) -> EngineResult<InferenceResult> {
        let handle = self.current().ok_or(EngineError::NotLoaded)?;
        let mapping = self.class_mapping();

        let image = decode_rgb(image_data).map_err(EngineError::Decode)?;
        let (orig_w, orig_h) = image.dimensions();

        let params = self.predict_params(confidence_threshold, iou_threshold);

        let start = Instant::now();
        let raw = handle
            .model()
            .predict(&image, &params)
            .map_err(EngineError::Inference)?;
        let inference_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        let detections = raw
            .into_iter()
            .map(|d| {
                let (class_name, external_id) = mapping.resolve(d.class_id, |id| handle.class_name(id));
                Detection {
                    class_id: d.class_id,
                    class_name,
                    external_id,
                    confidence: d.confidence.clamp(0.0, 1.0),
                    bbox: NormalizedBox::from_pixels(d.x1, d.y1, d.x2, d.y2, orig_w, orig_h),
                }
            })
            .collect();

        Ok(InferenceResult {
            detections,
            inference_time_ms,
            model_version: handle.version().to_string(),
        })
    }

    pub fn model_info(&self) -> ModelInfo {
        match self.current() {
            Some(handle) => ModelInfo {
                version: handle.version().to_string(),
                architecture: handle.architecture().to_string(),
                class_names: handle.class_names().to_vec(),
                input_size: handle.input_size(),
                loaded: true,
            },
            None => ModelInfo {
                version: NO_MODEL.to_string(),
                architecture: NO_MODEL.to_string(),
                class_names: Vec::new(),
                input_size: self.config.input_size,
                loaded: false,
            },
        }
    }

    fn predict_params(&self, confidence: Option<f32>, iou: Option<f32>) -> PredictParams {
        PredictParams {
            confidence_threshold: positive_or(confidence, self.config.default_confidence),
            iou_threshold: positive_or(iou, self.config.default_iou),
            input_size: self.config.input_size,
        }
    }
}

fn positive_or(value: Option<f32>, default: f32) -> f32 {
    value.filter(|v| *v > 0.0).unwrap_or(default)
}
