//! Detection engine module
//!
//! Provides hot-reloadable object detection with:
//! - Immutable, versioned model handles
//! - A catalog class mapping overlay
//! - An mtime-polling model watcher

pub mod backend;
pub mod detection;
pub mod handle;
pub mod mapping;
pub mod yolo;
pub mod preprocess;
pub mod watcher;

pub use backend::{DetectionModel, ModelLoader, PredictParams, RawDetection};
pub use detection::{Detection, DetectionEngine, InferenceResult, ModelInfo};
pub use handle::ModelHandle;
pub use mapping::{ClassEntry, ClassLabel, ClassMapping};
pub use yolo::OpenVinoLoader;
pub use watcher::{ModelWatcher, WatcherState};
