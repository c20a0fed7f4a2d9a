//! OpenVINO YOLOv8 detector
//!
//! Runs Ultralytics-style detection models (ONNX or OpenVINO IR) whose single
//! output is `[1, 4 + num_classes, anchors]`: center/size boxes followed by
//! per-class scores, in letterboxed input pixels.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use image::RgbImage;
use openvino::{CompiledModel, Core, ElementType, InferRequest, Shape, Tensor};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::backend::{DetectionModel, ModelLoader, PredictParams, RawDetection};
use super::preprocess::{preprocess_for_detection, ResizeInfo};
use crate::utils::math::{cxcywh_to_xyxy, iou};

pub const ARCHITECTURE: &str = "yolov8";

/// Upper bound on boxes returned per image.
pub const MAX_DETECTIONS: usize = 300;

/// Wrapper for OpenVINO Core that implements Send + Sync
struct SafeCore(Core);
unsafe impl Send for SafeCore {}
unsafe impl Sync for SafeCore {}

/// Wrapper for OpenVINO CompiledModel that implements Send + Sync
#[derive(Clone)]
struct SafeCompiledModel(Arc<CompiledModel>);
unsafe impl Send for SafeCompiledModel {}
unsafe impl Sync for SafeCompiledModel {}

impl SafeCompiledModel {
    /// OpenVINO CompiledModel methods are thread-safe in C++, but the Rust
    /// bindings require &mut self.
    fn create_infer_request(&self) -> Result<InferRequest> {
        unsafe {
            let ptr = Arc::as_ptr(&self.0) as *mut CompiledModel;
            (*ptr).create_infer_request().map_err(|e| e.into())
        }
    }
}

impl Deref for SafeCompiledModel {
    type Target = CompiledModel;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Compiles model files on a lazily created OpenVINO core.
pub struct OpenVinoLoader {
    device: String,
    core: Mutex<Option<SafeCore>>,
}

impl OpenVinoLoader {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            core: Mutex::new(None),
        }
    }
}

impl ModelLoader for OpenVinoLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn DetectionModel>> {
        let path_str = path
            .to_str()
            .with_context(|| format!("model path is not UTF-8: {}", path.display()))?;

        let mut guard = self.core.lock();
        if guard.is_none() {
            let core = Core::new().context("failed to initialize OpenVINO runtime")?;
            *guard = Some(SafeCore(core));
        }
        let core = &mut guard
            .as_mut()
            .context("OpenVINO core unavailable")?
            .0;

        let model = core
            .read_model_from_file(path_str, "")
            .context("failed to read model")?;
        let compiled = core
            .compile_model(&model, self.device.as_str().into())
            .with_context(|| format!("failed to compile model for {}", self.device))?;
        drop(guard);

        let names = OnceLock::new();
        match read_class_names(path)? {
            Some(list) => {
                info!("Loaded {} class names from sidecar", list.len());
                let _ = names.set(list);
            }
            None => debug!("No class name sidecar for {}", path.display()),
        }

        Ok(Box::new(YoloDetector {
            compiled: SafeCompiledModel(Arc::new(compiled)),
            names,
        }))
    }
}

/// YOLOv8 detector on a compiled OpenVINO model.
pub struct YoloDetector {
    compiled: SafeCompiledModel,
    /// From the sidecar, or derived from the output width on first inference.
    names: OnceLock<Vec<String>>,
}

impl DetectionModel for YoloDetector {
    fn architecture(&self) -> &str {
        ARCHITECTURE
    }

    fn class_names(&self) -> &[String] {
        self.names.get().map(Vec::as_slice).unwrap_or(&[])
    }

    fn predict(&self, image: &RgbImage, params: &PredictParams) -> Result<Vec<RawDetection>> {
        let size = params.input_size;
        let (input_tensor, resize_info) = preprocess_for_detection(image, size);

        let mut request = self.compiled.create_infer_request()?;

        let input_shape = Shape::new(&[1, 3, size as i64, size as i64])?;
        let mut input = Tensor::new(ElementType::F32, &input_shape)?;
        {
            let raw = input.get_raw_data_mut()?;
            let values = input_tensor
                .as_slice()
                .context("input tensor is not contiguous")?;
            for (dst, value) in raw.chunks_exact_mut(4).zip(values) {
                dst.copy_from_slice(&value.to_ne_bytes());
            }
        }

        request.set_input_tensor(&input)?;
        request.infer()?;

        let output = request.get_output_tensor_by_index(0)?;
        let dims: Vec<usize> = output
            .get_shape()?
            .get_dimensions()
            .iter()
            .map(|&d| d as usize)
            .collect();
        let data: Vec<f32> = output
            .get_raw_data()?
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let layout = OutputLayout::from_dims(&dims)?;
        let names = self.names.get_or_init(|| {
            (0..layout.num_classes).map(|i| format!("class_{}", i)).collect()
        });
        if names.len() != layout.num_classes {
            warn!(
                "Model reports {} classes but {} names are known",
                layout.num_classes,
                names.len()
            );
        }

        let candidates = decode_output(&data, &layout, &resize_info, params.confidence_threshold);
        Ok(nms(candidates, params.iou_threshold, MAX_DETECTIONS))
    }
}

/// Shape of a `[1, 4 + nc, anchors]` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
    pub num_classes: usize,
    pub num_anchors: usize,
}

impl OutputLayout {
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match dims {
            [1, channels, anchors] if *channels > 4 => Ok(Self {
                num_classes: channels - 4,
                num_anchors: *anchors,
            }),
            _ => anyhow::bail!("unexpected detection output shape {:?}", dims),
        }
    }
}

/// Decode raw output into boxes in original image pixels, best class per
/// anchor, clamped to the image.
pub fn decode_output(
    data: &[f32],
    layout: &OutputLayout,
    resize_info: &ResizeInfo,
    confidence_threshold: f32,
) -> Vec<RawDetection> {
    let n = layout.num_anchors;
    let at = |row: usize, col: usize| data.get(row * n + col).copied().unwrap_or(0.0);

    let max_x = resize_info.original_width as f32;
    let max_y = resize_info.original_height as f32;

    let mut boxes = Vec::new();
    for i in 0..n {
        let (class_id, score) = (0..layout.num_classes)
            .map(|c| (c, at(4 + c, i)))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });

        if score < confidence_threshold {
            continue;
        }

        let [x1, y1, x2, y2] = cxcywh_to_xyxy(at(0, i), at(1, i), at(2, i), at(3, i));
        let (x1, y1) = resize_info.to_original(x1, y1);
        let (x2, y2) = resize_info.to_original(x2, y2);

        boxes.push(RawDetection {
            class_id: class_id as i32,
            confidence: score,
            x1: x1.clamp(0.0, max_x),
            y1: y1.clamp(0.0, max_y),
            x2: x2.clamp(0.0, max_x),
            y2: y2.clamp(0.0, max_y),
        });
    }
    boxes
}

/// Class-aware non-maximum suppression. Output is confidence-descending.
pub fn nms(mut boxes: Vec<RawDetection>, iou_threshold: f32, max_detections: usize) -> Vec<RawDetection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::new();
    for candidate in boxes {
        if keep.len() >= max_detections {
            break;
        }
        let corners = [candidate.x1, candidate.y1, candidate.x2, candidate.y2];
        let suppressed = keep.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&[k.x1, k.y1, k.x2, k.y2], &corners) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

/// `<model stem>.names.json` next to the model file.
pub fn class_names_path(model_path: &Path) -> PathBuf {
    let stem = model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    model_path.with_file_name(format!("{}.names.json", stem))
}

/// Read the class name sidecar. Accepts a JSON array of names or an object
/// keyed by class id (`{"0": "cola"}`); ids must be dense from 0.
pub fn read_class_names(model_path: &Path) -> Result<Option<Vec<String>>> {
    let path = class_names_path(model_path);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_class_names(&content)
        .with_context(|| format!("invalid class names in {}", path.display()))
        .map(Some)
}

fn parse_class_names(content: &str) -> Result<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => Ok(s),
                other => anyhow::bail!("class name must be a string, got {}", other),
            })
            .collect(),
        serde_json::Value::Object(map) => {
            let mut entries = map
                .into_iter()
                .map(|(k, v)| {
                    let id: usize = k.parse().with_context(|| format!("bad class id {:?}", k))?;
                    let name = v
                        .as_str()
                        .with_context(|| format!("class {} name must be a string", id))?
                        .to_string();
                    Ok((id, name))
                })
                .collect::<Result<Vec<_>>>()?;
            entries.sort_by_key(|(id, _)| *id);
            for (expected, (id, _)) in entries.iter().enumerate() {
                if *id != expected {
                    anyhow::bail!("class ids must be dense from 0, missing {}", expected);
                }
            }
            Ok(entries.into_iter().map(|(_, name)| name).collect())
        }
        _ => anyhow::bail!("expected a JSON array or object"),
    }
}
