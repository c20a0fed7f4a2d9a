//! Immutable, versioned model snapshots

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use image::RgbImage;
use tracing::{debug, info};

use super::backend::{DetectionModel, ModelLoader, PredictParams};
use crate::error::LoadError;

/// A loaded model plus everything needed to interpret its output.
///
/// Never mutated after construction; a reload builds a new handle.
pub struct ModelHandle {
    model: Box<dyn DetectionModel>,
    class_names: Vec<String>,
    version: String,
    input_size: u32,
    source: PathBuf,
    modified_at: DateTime<Utc>,
}

impl ModelHandle {
    /// Load the artifact at `path` and warm it up.
    ///
    /// The warm-up runs one prediction on a zero-filled `input_size` square
    /// image so the first real request does not pay initialization cost.
    pub fn load(
        loader: &dyn ModelLoader,
        path: &Path,
        input_size: u32,
        warmup: PredictParams,
    ) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        let corrupt = |source: anyhow::Error| LoadError::Corrupt {
            path: path.to_path_buf(),
            source,
        };

        let modified = file_mtime(path)
            .ok_or_else(|| LoadError::NotFound(path.to_path_buf()))?;

        info!("Loading model from {}", path.display());
        let start = Instant::now();

        let model = loader.load(path).map_err(corrupt)?;

        let dummy = RgbImage::new(input_size, input_size);
        model
            .predict(&dummy, &PredictParams { input_size, ..warmup })
            .map_err(|e| corrupt(e.context("warm-up inference failed")))?;
        debug!("Warm-up inference done for {}", path.display());

        let class_names = model.class_names().to_vec();
        let handle = Self {
            model,
            class_names,
            version: version_from_mtime(modified),
            input_size,
            source: path.to_path_buf(),
            modified_at: DateTime::<Utc>::from(modified),
        };

        info!(
            "Model {} loaded in {:?} ({} classes)",
            handle.version,
            start.elapsed(),
            handle.class_names.len()
        );

        Ok(handle)
    }

    pub fn model(&self) -> &dyn DetectionModel {
        self.model.as_ref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn architecture(&self) -> &str {
        self.model.architecture()
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    /// Intrinsic name for `class_id`, `class_<id>` when outside the table.
    pub fn class_name(&self, class_id: i32) -> String {
        usize::try_from(class_id)
            .ok()
            .and_then(|idx| self.class_names.get(idx))
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("version", &self.version)
            .field("architecture", &self.architecture())
            .field("classes", &self.class_names.len())
            .field("input_size", &self.input_size)
            .field("source", &self.source)
            .finish()
    }
}

/// Modification time of `path`, `None` when missing or unreadable.
pub fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// `v<seconds>` from a modification time, truncated to whole seconds.
pub fn version_from_mtime(mtime: SystemTime) -> String {
    let secs = mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("v{}", secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::fake::{write_model, FakeLoader};
    use std::time::Duration;

    const PARAMS: PredictParams = PredictParams {
        confidence_threshold: 0.5,
        iou_threshold: 0.45,
        input_size: 640,
    };

    #[test]
    fn test_version_from_mtime() {
        let t = UNIX_EPOCH + Duration::from_millis(1_700_000_000_900);
        assert_eq!(version_from_mtime(t), "v1700000000");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelHandle::load(&FakeLoader::default(), &dir.path().join("absent.onnx"), 64, PARAMS)
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        write_model(&path, "corrupt", 1_000);

        let err = ModelHandle::load(&FakeLoader::default(), &path, 64, PARAMS).unwrap_err();
        assert!(matches!(err, LoadError::Corrupt { .. }));
    }

    #[test]
    fn test_warmup_failure_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        write_model(&path, "nowarm", 1_000);

        let err = ModelHandle::load(&FakeLoader::default(), &path, 64, PARAMS).unwrap_err();
        assert!(matches!(err, LoadError::Corrupt { .. }));
        assert!(err.to_string().contains("warm-up"));
    }

    #[test]
    fn test_load_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        write_model(&path, "cola,sprite", 1_234);

        let handle = ModelHandle::load(&FakeLoader::default(), &path, 64, PARAMS).unwrap();
        assert_eq!(handle.version(), "v1234");
        assert_eq!(handle.class_names(), &["cola".to_string(), "sprite".to_string()]);
        assert_eq!(handle.input_size(), 64);
        assert_eq!(handle.class_name(1), "sprite");
        assert_eq!(handle.class_name(7), "class_7");
        assert_eq!(handle.class_name(-1), "class_-1");
        assert_eq!(handle.architecture(), "fake");
    }
}
