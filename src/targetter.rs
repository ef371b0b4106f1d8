//! Offline dataset tooling: package face crops from stills, then train and test the recognizer.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::config::Config;
use crate::faces::{
    BoundingBoxDecoder, Detector, FacePackager, FaceTrainer, NmsDeduplicator, OnnxDetector,
    PackagingSummary,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct TargetterOptions {
    /// Package the off-target directory pair instead of the target pair
    pub build_test_images: bool,
    pub no_nms: bool,
    /// Train on the packaged target faces and test on the off-target ones
    pub test_recognition: bool,
}

/// Outcome of one targetter invocation.
#[derive(Debug, Clone, Default)]
pub struct TargetterReport {
    pub packaging: Option<PackagingSummary>,
    pub predictions: usize,
}

/// Input and output directories selected by the options.
pub fn directories(config: &Config, options: &TargetterOptions) -> (PathBuf, PathBuf) {
    let t = &config.targetter;
    if options.build_test_images {
        (t.offtarget_input_dir.clone(), t.offtarget_output_dir.clone())
    } else {
        (t.input_dir.clone(), t.output_dir.clone())
    }
}

pub fn run_targetter(config: &Config, options: &TargetterOptions) -> Result<TargetterReport> {
    let detector = OnnxDetector::new(&config.detection.model_path, config.detection.input_size);
    run_with_detector(config, options, detector)
}

/// Run the targetter with any detector.
///
/// `--test_recognition` skips packaging and works on previously packaged faces.
pub fn run_with_detector<D: Detector>(
    config: &Config,
    options: &TargetterOptions,
    detector: D,
) -> Result<TargetterReport> {
    if options.test_recognition {
        let predictions = test_recognition(config)?;
        return Ok(TargetterReport { packaging: None, predictions });
    }

    let detection = &config.detection;
    let (input_dir, output_dir) = directories(config, options);

    let mut packager = FacePackager::new(
        detector,
        BoundingBoxDecoder::new(detection.confidence_threshold),
        NmsDeduplicator::new(detection.iou_threshold, !options.no_nms),
        detection.face_class_id,
        detection.face_size,
        config.targetter.image_extensions.clone(),
    );
    let summary = packager
        .run(&input_dir, &output_dir)
        .with_context(|| format!("Failed to package faces from {}", input_dir.display()))?;

    Ok(TargetterReport { packaging: Some(summary), predictions: 0 })
}

fn test_recognition(config: &Config) -> Result<usize> {
    let trainer = FaceTrainer::new(
        config.detection.face_size,
        config.recognition.label_id,
        config.targetter.image_extensions.clone(),
    );

    let recognizer = trainer.train(&config.targetter.output_dir, &config.recognition.model_path)?;
    let results = trainer.evaluate(&recognizer, &config.targetter.offtarget_output_dir)?;

    info!(tested = results.len(), "Recognition test complete");
    Ok(results.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as RecallerResult;
    use crate::faces::RawDetection;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::path::Path;
    use tempfile::tempdir;

    /// Two near-identical face boxes per image.
    struct DoubleFace;

    impl Detector for DoubleFace {
        fn load(&mut self) -> RecallerResult<()> {
            Ok(())
        }

        fn infer(&mut self, _image: &DynamicImage) -> RecallerResult<Vec<RawDetection>> {
            let raw = |cx: f32, score: f32| RawDetection {
                center_x: cx,
                center_y: 0.5,
                width: 0.4,
                height: 0.4,
                class_scores: vec![0.0, score],
            };
            Ok(vec![raw(0.5, 0.9), raw(0.51, 0.8)])
        }
    }

    fn config(root: &Path) -> Config {
        let mut config = Config::default();
        config.targetter.input_dir = root.join("target_images");
        config.targetter.output_dir = root.join("target");
        config.targetter.offtarget_input_dir = root.join("offtarget_images");
        config.targetter.offtarget_output_dir = root.join("offtarget");
        config.recognition.model_path = root.join("target/face_model.json");
        config.detection.face_size = 48;
        config
    }

    fn write_stills(dir: &Path, count: u32) {
        std::fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            RgbImage::from_fn(80, 80, |x, y| {
                let v = ((x * (i + 3) + y * 5) % 251) as u8;
                Rgb([v, v, v])
            })
            .save(dir.join(format!("still_{}.png", i)))
            .unwrap();
        }
    }

    fn count_faces(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                let name = e.as_ref().unwrap().file_name();
                let name = name.to_string_lossy();
                name.starts_with("face_") && name.ends_with(".jpg")
            })
            .count()
    }

    #[test]
    fn test_flags_select_directories_and_nms() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        write_stills(&config.targetter.input_dir, 2);
        write_stills(&config.targetter.offtarget_input_dir, 1);

        let report = run_with_detector(&config, &TargetterOptions::default(), DoubleFace).unwrap();
        assert_eq!(report.packaging.unwrap().faces_saved, 2);
        assert_eq!(count_faces(&config.targetter.output_dir), 2);

        let options = TargetterOptions { build_test_images: true, no_nms: true, test_recognition: false };
        let report = run_with_detector(&config, &options, DoubleFace).unwrap();
        assert_eq!(report.packaging.unwrap().faces_saved, 2);
        assert_eq!(count_faces(&config.targetter.offtarget_output_dir), 2);
    }

    #[test]
    fn test_recognition_round() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        write_stills(&config.targetter.input_dir, 2);
        write_stills(&config.targetter.offtarget_input_dir, 3);

        run_with_detector(&config, &TargetterOptions::default(), DoubleFace).unwrap();
        let offtarget = TargetterOptions { build_test_images: true, ..Default::default() };
        run_with_detector(&config, &offtarget, DoubleFace).unwrap();

        let options = TargetterOptions { test_recognition: true, ..Default::default() };
        let report = run_with_detector(&config, &options, DoubleFace).unwrap();

        assert!(report.packaging.is_none());
        assert_eq!(report.predictions, 3);
        assert!(config.recognition.model_path.exists());
    }

    #[test]
    fn test_missing_input_dir_fails() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let err = run_with_detector(&config, &TargetterOptions::default(), DoubleFace).unwrap_err();
        assert!(format!("{:#}", err).contains("target_images"));
    }
}
