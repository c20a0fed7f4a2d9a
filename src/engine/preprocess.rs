//! Image preprocessing and coordinate frames for detection

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;
use anyhow::Result;

/// Letterbox fill used by YOLO-family models.
pub const LETTERBOX_FILL: u8 = 114;

/// Resize with aspect ratio preservation and centered padding to a square
/// `size` x `size` canvas.
pub fn letterbox(image: &RgbImage, size: u32) -> RgbImage {
    let info = ResizeInfo::new(image.dimensions(), (size, size));
    let new_w = ((image.width() as f32 * info.scale) as u32).clamp(1, size);
    let new_h = ((image.height() as f32 * info.scale) as u32).clamp(1, size);

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut padded = ImageBuffer::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    image::imageops::replace(&mut padded, &resized, info.offset_x as i64, info.offset_y as i64);
    padded
}

/// Convert an RGB image to an NCHW tensor scaled to [0, 1].
pub fn image_to_nchw(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();

    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    tensor
}

/// Letterbox and tensorize in one step.
pub fn preprocess_for_detection(image: &RgbImage, input_size: u32) -> (Array4<f32>, ResizeInfo) {
    let info = ResizeInfo::new(image.dimensions(), (input_size, input_size));
    let padded = letterbox(image, input_size);
    (image_to_nchw(&padded), info)
}

/// Decode image from bytes with EXIF orientation handling
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(data)?;
    Ok(apply_exif_orientation(data, image))
}

/// Decode and convert to the canonical 3-channel layout.
pub fn decode_rgb(data: &[u8]) -> Result<RgbImage> {
    let image = decode_image(data)?;
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        anyhow::bail!("image has zero size ({}x{})", w, h);
    }
    Ok(image.to_rgb8())
}

/// Apply EXIF orientation to correct image rotation
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    use std::io::Cursor;

    let orientation = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    };

    // https://exiftool.org/TagNames/EXIF.html (Orientation)
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Mapping between original image pixels and letterboxed model input.
#[derive(Debug, Clone, Copy)]
pub struct ResizeInfo {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ResizeInfo {
    pub fn new(original: (u32, u32), target: (u32, u32)) -> Self {
        let (orig_w, orig_h) = original;
        let (target_w, target_h) = target;

        let scale = f32::min(
            target_w as f32 / orig_w.max(1) as f32,
            target_h as f32 / orig_h.max(1) as f32,
        );

        let new_w = ((orig_w as f32 * scale) as u32).min(target_w);
        let new_h = ((orig_h as f32 * scale) as u32).min(target_h);

        Self {
            scale,
            offset_x: (target_w - new_w) / 2,
            offset_y: (target_h - new_h) / 2,
            original_width: orig_w,
            original_height: orig_h,
        }
    }

    /// Convert model input coordinates back to original image space
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let x = (x - self.offset_x as f32) / self.scale;
        let y = (y - self.offset_y as f32) / self.scale;
        (x, y)
    }

    /// Convert original image coordinates into model input space
    pub fn to_input(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.scale + self.offset_x as f32,
            y * self.scale + self.offset_y as f32,
        )
    }
}

/// Bounding box as fractions of the original image size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl NormalizedBox {
    /// Normalize a pixel box against the original image size, clamped to [0, 1].
    pub fn from_pixels(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Self {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        Self {
            x1: (x1 / w).clamp(0.0, 1.0),
            y1: (y1 / h).clamp(0.0, 1.0),
            x2: (x2 / w).clamp(0.0, 1.0),
            y2: (y2 / h).clamp(0.0, 1.0),
        }
    }

    pub fn to_pixels(&self, width: u32, height: u32) -> (f32, f32, f32, f32) {
        let (w, h) = (width as f32, height as f32);
        (self.x1 * w, self.y1 * h, self.x2 * w, self.y2 * h)
    }
}
