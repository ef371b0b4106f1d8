use anyhow::{bail, Context, Result};
use image::{imageops::FilterType, DynamicImage, GrayImage};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::recognizer::{LbphRecognizer, Prediction, Recognizer};
use crate::source::discover_images;

/// Trains the recognizer on packaged face crops and checks it against held-out ones.
pub struct FaceTrainer {
    face_size: u32,
    label_id: i32,
    extensions: Vec<String>,
}

impl FaceTrainer {
    pub fn new(face_size: u32, label_id: i32, extensions: Vec<String>) -> Self {
        Self {
            face_size,
            label_id,
            extensions,
        }
    }

    /// Grayscale faces from `dir`, scaled to the face size. Unreadable files are skipped.
    pub fn load_faces(&self, dir: &Path) -> Result<Vec<(PathBuf, GrayImage)>> {
        let paths = discover_images(dir, &self.extensions)?;
        let mut faces = Vec::with_capacity(paths.len());

        for path in paths {
            match image::open(&path) {
                Ok(img) => {
                    let gray = img
                        .resize_exact(self.face_size, self.face_size, FilterType::Triangle)
                        .to_luma8();
                    faces.push((path, gray));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable face");
                }
            }
        }

        Ok(faces)
    }

    /// Fit a model on every face in `train_dir` under the target label and save it.
    pub fn train(&self, train_dir: &Path, model_path: &Path) -> Result<LbphRecognizer> {
        let faces = self.load_faces(train_dir)?;
        if faces.is_empty() {
            bail!("No training faces found in {}", train_dir.display());
        }

        let images: Vec<GrayImage> = faces.into_iter().map(|(_, img)| img).collect();
        let labels = vec![self.label_id; images.len()];

        let mut recognizer = LbphRecognizer::default();
        recognizer.train(&images, &labels)?;
        recognizer
            .save(model_path)
            .with_context(|| format!("Failed to save model to {}", model_path.display()))?;

        info!(
            samples = images.len(),
            label = self.label_id,
            model = %model_path.display(),
            "Training complete"
        );
        Ok(recognizer)
    }

    /// Predict every face in `test_dir`, logging label and distance for each.
    pub fn evaluate(
        &self,
        recognizer: &impl Recognizer,
        test_dir: &Path,
    ) -> Result<Vec<(PathBuf, Prediction)>> {
        let faces = self.load_faces(test_dir)?;
        let mut results = Vec::with_capacity(faces.len());

        for (path, gray) in faces {
            let prediction = recognizer.predict(&DynamicImage::ImageLuma8(gray))?;
            info!(
                path = %path.display(),
                label = prediction.label,
                distance = prediction.distance,
                "Prediction"
            );
            results.push((path, prediction));
        }

        Ok(results)
    }
}
