use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::decoder::BoundingBox;
use crate::error::{RecallerError, Result};

/// One anchor of raw detector output, geometry normalized to [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub class_scores: Vec<f32>,
}

/// Opaque detection capability: image in, raw per-anchor rows out.
pub trait Detector: Send {
    /// Load model weights. Failing here is fatal to whoever owns the detector.
    fn load(&mut self) -> Result<()>;

    fn infer(&mut self, image: &DynamicImage) -> Result<Vec<RawDetection>>;

    /// Drop loaded weights. A later `load` may bring them back.
    fn unload(&mut self) {}
}

/// YOLO-style detector exported to ONNX.
///
/// Each output row is `[cx, cy, w, h, objectness, class scores...]`.
pub struct OnnxDetector {
    model_path: PathBuf,
    input_size: u32,
    session: Option<Session>,
}

impl OnnxDetector {
    pub fn new(model_path: impl Into<PathBuf>, input_size: u32) -> Self {
        Self {
            model_path: model_path.into(),
            input_size,
            session: None,
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    /// Resized, [0, 1]-scaled RGB planes in NCHW order.
    fn preprocess(&self, image: &DynamicImage) -> Result<Tensor<f32>> {
        let size = self.input_size as usize;
        let resized = image.resize_exact(self.input_size, self.input_size, FilterType::Triangle);
        let rgb = resized.to_rgb8();

        let plane = size * size;
        let mut input_data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let idx = y as usize * size + x as usize;
            input_data[idx] = pixel[0] as f32 / 255.0;
            input_data[plane + idx] = pixel[1] as f32 / 255.0;
            input_data[2 * plane + idx] = pixel[2] as f32 / 255.0;
        }

        Tensor::from_array(([1usize, 3, size, size], input_data.into_boxed_slice()))
            .map_err(RecallerError::processing)
    }
}

impl Detector for OnnxDetector {
    fn load(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let resource = self.model_path.display().to_string();
        if !self.model_path.exists() {
            return Err(RecallerError::model_load(resource, "model file not found"));
        }

        let session = build_session(&self.model_path)
            .map_err(|e| RecallerError::model_load(resource.clone(), format!("{:#}", e)))?;

        info!(model = %resource, "Detection model loaded");
        self.session = Some(session);
        Ok(())
    }

    fn infer(&mut self, image: &DynamicImage) -> Result<Vec<RawDetection>> {
        if !self.is_loaded() {
            return Err(RecallerError::processing("detection model not loaded"));
        }
        let input_tensor = self.preprocess(image)?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| RecallerError::processing("detection model not loaded"))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(RecallerError::processing)?;

        let mut detections = Vec::new();
        // Darknet exports one output per detection scale; all share the row layout.
        for (name, value) in outputs.iter() {
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(RecallerError::processing)?;
            let row_len = shape.last().copied().unwrap_or(0) as usize;
            if row_len <= 5 {
                debug!(output = %name, ?shape, "Skipping output without class scores");
                continue;
            }
            detections.extend(data.chunks_exact(row_len).map(|row| RawDetection {
                center_x: row[0],
                center_y: row[1],
                width: row[2],
                height: row[3],
                class_scores: row[5..].to_vec(),
            }));
        }

        Ok(detections)
    }

    fn unload(&mut self) {
        if self.session.take().is_some() {
            debug!(model = %self.model_path.display(), "Detection model unloaded");
        }
    }
}

fn build_session(model_path: &Path) -> anyhow::Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(model_path)?;
    Ok(session)
}

/// Cut `bbox` out of `image` and scale it to a `size`×`size` square.
///
/// Returns `None` when the box does not cover any pixel of the image.
pub fn crop_face(image: &DynamicImage, bbox: &BoundingBox, size: u32) -> Option<DynamicImage> {
    let (img_width, img_height) = image.dimensions();
    if bbox.x >= img_width || bbox.y >= img_height {
        return None;
    }

    let w = bbox.width.min(img_width - bbox.x);
    let h = bbox.height.min(img_height - bbox.y);
    if w == 0 || h == 0 {
        return None;
    }

    let crop = image.crop_imm(bbox.x, bbox.y, w, h);
    Some(crop.resize_exact(size, size, FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn bbox(x: u32, y: u32, width: u32, height: u32) -> BoundingBox {
        BoundingBox { x, y, width, height, confidence: 0.9, class_id: 1 }
    }

    #[test]
    fn test_crop_face_resizes() {
        let mut img = RgbImage::from_pixel(100, 80, Rgb([0, 0, 0]));
        for x in 20..40 {
            for y in 10..30 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let img = DynamicImage::ImageRgb8(img);

        let face = crop_face(&img, &bbox(20, 10, 20, 20), 150).unwrap();
        assert_eq!(face.dimensions(), (150, 150));
        assert_eq!(face.to_rgb8().get_pixel(75, 75), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_crop_face_outside_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(50, 50));
        assert!(crop_face(&img, &bbox(60, 0, 10, 10), 150).is_none());
        assert!(crop_face(&img, &bbox(0, 0, 0, 10), 150).is_none());
    }

    #[test]
    fn test_missing_model_is_load_failure() {
        let mut detector = OnnxDetector::new("/nonexistent/people.onnx", 416);
        let err = detector.load().unwrap_err();
        assert!(matches!(err, RecallerError::ModelLoad { ref resource, .. } if resource.contains("people.onnx")));
        assert!(!detector.is_loaded());
    }

    #[test]
    fn test_infer_requires_load() {
        let mut detector = OnnxDetector::new("/nonexistent/people.onnx", 32);
        let img = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
        assert!(matches!(detector.infer(&img), Err(RecallerError::Processing(_))));
    }
}
