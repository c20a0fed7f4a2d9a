//! Inference capability boundary
//!
//! The engine never looks inside a model: it hands over an RGB image plus
//! thresholds and gets back raw boxes in original-image pixel space.

use std::path::Path;

use image::RgbImage;

/// A raw detection as produced by a model, in original image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: i32,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Per-call inference parameters.
#[derive(Debug, Clone, Copy)]
pub struct PredictParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Square model input resolution.
    pub input_size: u32,
}

/// A loaded detection model. Implementations must tolerate concurrent
/// `predict` calls.
pub trait DetectionModel: Send + Sync {
    /// Architecture tag reported by model info.
    fn architecture(&self) -> &str;

    /// Intrinsic class names, indexed by class id.
    fn class_names(&self) -> &[String];

    fn predict(&self, image: &RgbImage, params: &PredictParams) -> anyhow::Result<Vec<RawDetection>>;
}

/// Deserializes a model artifact from disk.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> anyhow::Result<Box<dyn DetectionModel>>;
}

/// Text-file backed model used by tests across the crate.
///
/// The model file holds comma separated class names; a file starting with
/// `corrupt` fails to load and one starting with `nowarm` fails every
/// prediction.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    pub struct FakeModel {
        names: Vec<String>,
        detections: Vec<RawDetection>,
        fail_predict: bool,
    }

    impl DetectionModel for FakeModel {
        fn architecture(&self) -> &str {
            "fake"
        }

        fn class_names(&self) -> &[String] {
            &self.names
        }

        fn predict(&self, _image: &RgbImage, params: &PredictParams) -> anyhow::Result<Vec<RawDetection>> {
            if self.fail_predict {
                anyhow::bail!("forward pass exploded");
            }
            Ok(self
                .detections
                .iter()
                .filter(|d| d.confidence >= params.confidence_threshold)
                .cloned()
                .collect())
        }
    }

    /// Loader whose models always report the same raw detections.
    #[derive(Clone, Default)]
    pub struct FakeLoader {
        pub detections: Arc<Mutex<Vec<RawDetection>>>,
        pub loads: Arc<Mutex<usize>>,
    }

    impl FakeLoader {
        pub fn with_detections(detections: Vec<RawDetection>) -> Self {
            Self {
                detections: Arc::new(Mutex::new(detections)),
                loads: Arc::default(),
            }
        }

        pub fn load_count(&self) -> usize {
            *self.loads.lock()
        }
    }

    impl ModelLoader for FakeLoader {
        fn load(&self, path: &Path) -> anyhow::Result<Box<dyn DetectionModel>> {
            *self.loads.lock() += 1;
            let content = std::fs::read_to_string(path)?;
            let content = content.trim();
            if content.starts_with("corrupt") {
                anyhow::bail!("not a model");
            }
            let fail_predict = content.starts_with("nowarm");
            let names = content
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            Ok(Box::new(FakeModel {
                names,
                detections: self.detections.lock().clone(),
                fail_predict,
            }))
        }
    }

    pub fn raw(class_id: i32, confidence: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            x1: bbox[0],
            y1: bbox[1],
            x2: bbox[2],
            y2: bbox[3],
        }
    }

    /// PNG-encoded solid image.
    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = image::DynamicImage::new_rgb8(width, height);
        let mut buffer = std::io::Cursor::new(Vec::new());
        image.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    /// Write a model file and push its mtime to `secs` past the epoch.
    pub fn write_model(path: &Path, content: &str, secs: u64) {
        std::fs::write(path, content).unwrap();
        set_mtime(path, secs);
    }

    pub fn set_mtime(path: &Path, secs: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs))
            .unwrap();
    }
}
