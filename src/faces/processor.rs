use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use std::path::Path;
use tracing::{debug, info, warn};

use super::decoder::BoundingBoxDecoder;
use super::detector::{crop_face, Detector};
use super::nms::NmsDeduplicator;
use crate::source::discover_images;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackagingSummary {
    pub images_processed: usize,
    pub images_skipped: usize,
    pub faces_saved: usize,
}

/// Extracts face crops from a directory of stills into a numbered dataset.
pub struct FacePackager<D: Detector> {
    detector: D,
    decoder: BoundingBoxDecoder,
    nms: NmsDeduplicator,
    face_class_id: usize,
    face_size: u32,
    extensions: Vec<String>,
}

impl<D: Detector> FacePackager<D> {
    pub fn new(
        detector: D,
        decoder: BoundingBoxDecoder,
        nms: NmsDeduplicator,
        face_class_id: usize,
        face_size: u32,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            detector,
            decoder,
            nms,
            face_class_id,
            face_size,
            extensions,
        }
    }

    /// Detect, deduplicate and crop the faces of one image.
    pub fn extract_faces(&mut self, image: &DynamicImage) -> Result<Vec<DynamicImage>> {
        let (width, height) = image.dimensions();
        let raw = self.detector.infer(image)?;
        let boxes = self
            .decoder
            .decode_class(&raw, width, height, self.face_class_id);
        let kept = self.nms.dedup(boxes);

        Ok(kept
            .iter()
            .filter_map(|bbox| crop_face(image, bbox, self.face_size))
            .collect())
    }

    /// Package every image of `input_dir` into `output_dir` as `face_NNNN.jpg`.
    ///
    /// Numbering starts at 0 and runs across the whole directory. Images that
    /// cannot be read or processed are skipped.
    pub fn run(&mut self, input_dir: &Path, output_dir: &Path) -> Result<PackagingSummary> {
        self.detector.load()?;

        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;
        let images = discover_images(input_dir, &self.extensions)?;
        let total = images.len();

        info!(
            input = %input_dir.display(),
            output = %output_dir.display(),
            images = total,
            nms = self.nms.is_enabled(),
            "Packaging faces"
        );

        let mut summary = PackagingSummary::default();

        for (idx, path) in images.iter().enumerate() {
            debug!(current = idx + 1, total, path = %path.display(), "Processing image");

            let faces = match image::open(path)
                .map_err(anyhow::Error::from)
                .and_then(|img| self.extract_faces(&img))
            {
                Ok(faces) => faces,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping image");
                    summary.images_skipped += 1;
                    continue;
                }
            };

            for face in &faces {
                let name = format!("face_{:04}.jpg", summary.faces_saved);
                let out = output_dir.join(&name);
                // JPEG has no alpha channel
                DynamicImage::ImageRgb8(face.to_rgb8())
                    .save(&out)
                    .with_context(|| format!("Failed to write {}", out.display()))?;
                debug!(path = %out.display(), "Face saved");
                summary.faces_saved += 1;
            }

            summary.images_processed += 1;
            if !faces.is_empty() {
                info!(path = %path.display(), count = faces.len(), "Found faces");
            }
        }

        self.detector.unload();

        info!(
            processed = summary.images_processed,
            skipped = summary.images_skipped,
            faces = summary.faces_saved,
            "Packaging complete"
        );

        Ok(summary)
    }
}
