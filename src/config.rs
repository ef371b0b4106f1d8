use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::OverflowPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub live: LiveConfig,

    #[serde(default)]
    pub targetter: TargetterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_queue_capacity")]
    pub detect_queue_capacity: usize,

    #[serde(default = "default_detect_overflow")]
    pub detect_overflow: OverflowPolicy,

    #[serde(default = "default_queue_capacity")]
    pub face_queue_capacity: usize,

    #[serde(default = "default_face_overflow")]
    pub face_overflow: OverflowPolicy,

    /// How long a stage waits on an empty input queue before re-checking the stop signal.
    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,

    /// Interval between supervisor liveness checks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_queue_capacity() -> usize {
    5
}

fn default_detect_overflow() -> OverflowPolicy {
    OverflowPolicy::DropOldest
}

fn default_face_overflow() -> OverflowPolicy {
    OverflowPolicy::DropNewest
}

fn default_pop_timeout_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detect_queue_capacity: default_queue_capacity(),
            detect_overflow: default_detect_overflow(),
            face_queue_capacity: default_queue_capacity(),
            face_overflow: default_face_overflow(),
            pop_timeout_ms: default_pop_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// ONNX export of the person/face detector
    #[serde(default = "default_detector_model")]
    pub model_path: PathBuf,

    /// Square input edge the detector expects
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_face_class_id")]
    pub face_class_id: usize,

    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Run NMS on the live per-frame path as well as in the packager.
    #[serde(default)]
    pub live_nms: bool,

    /// Edge of the square face crops handed to recognition and written by the packager.
    #[serde(default = "default_face_size")]
    pub face_size: u32,
}

fn default_detector_model() -> PathBuf {
    PathBuf::from("models/people-r-people.onnx")
}

fn default_input_size() -> u32 {
    416
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_face_class_id() -> usize {
    1
}

fn default_iou_threshold() -> f32 {
    0.3
}

fn default_face_size() -> u32 {
    150
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: default_detector_model(),
            input_size: default_input_size(),
            confidence_threshold: default_confidence_threshold(),
            face_class_id: default_face_class_id(),
            iou_threshold: default_iou_threshold(),
            live_nms: false,
            face_size: default_face_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Trained recognizer written by `targetter --test_recognition`
    #[serde(default = "default_recognizer_model")]
    pub model_path: PathBuf,

    /// Label assigned to the target's faces during training
    #[serde(default = "default_label_id")]
    pub label_id: i32,
}

fn default_recognizer_model() -> PathBuf {
    PathBuf::from("target/face_model.json")
}

fn default_label_id() -> i32 {
    1
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            model_path: default_recognizer_model(),
            label_id: default_label_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Frame directories selectable with `--cam N`, in index order.
    #[serde(default)]
    pub sources: Vec<PathBuf>,

    /// Camera index used when `--cam` is not given.
    #[serde(default)]
    pub default_camera: Option<usize>,

    /// Minimum delay between two frames read from a source (0 = as fast as possible).
    #[serde(default)]
    pub frame_interval_ms: u64,

    /// Restart from the first frame when a source runs out.
    #[serde(default)]
    pub loop_frames: bool,

    /// Frame file extensions read from a source directory
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            default_camera: None,
            frame_interval_ms: 0,
            loop_frames: false,
            image_extensions: default_image_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetterConfig {
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_offtarget_input_dir")]
    pub offtarget_input_dir: PathBuf,

    #[serde(default = "default_offtarget_output_dir")]
    pub offtarget_output_dir: PathBuf,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("target_images")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("target")
}

fn default_offtarget_input_dir() -> PathBuf {
    PathBuf::from("offtarget_images")
}

fn default_offtarget_output_dir() -> PathBuf {
    PathBuf::from("offtarget")
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "bmp".to_string(),
    ]
}

impl Default for TargetterConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            offtarget_input_dir: default_offtarget_input_dir(),
            offtarget_output_dir: default_offtarget_output_dir(),
            image_extensions: default_image_extensions(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            detection: DetectionConfig::default(),
            recognition: RecognitionConfig::default(),
            live: LiveConfig::default(),
            targetter: TargetterConfig::default(),
        }
    }
}

impl Config {
    /// Load from `$RECALLER_CONFIG` or the default location, writing defaults on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.detect_queue_capacity == 0 || self.pipeline.face_queue_capacity == 0 {
            bail!("queue capacities must be positive");
        }
        if self.pipeline.pop_timeout_ms == 0 {
            bail!("pop_timeout_ms must be positive");
        }
        for (name, value) in [
            ("confidence_threshold", self.detection.confidence_threshold),
            ("iou_threshold", self.detection.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        if self.detection.face_size == 0 || self.detection.input_size == 0 {
            bail!("face_size and input_size must be positive");
        }
        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("recaller")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("RECALLER_CONFIG") {
            return PathBuf::from(path);
        }

        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[pipeline]
face_queue_capacity = 2
face_overflow = "drop-oldest"

[detection]
live_nms = true
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.pipeline.face_queue_capacity, 2);
        assert_eq!(config.pipeline.face_overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.pipeline.detect_queue_capacity, 5);
        assert_eq!(config.pipeline.detect_overflow, OverflowPolicy::DropOldest);
        assert!(config.detection.live_nms);
        assert_eq!(config.detection.face_class_id, 1);
        assert!((config.detection.iou_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.targetter.output_dir, PathBuf::from("target"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.live.sources = vec![PathBuf::from("frames/cam0")];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.live.sources, config.live.sources);
        assert_eq!(loaded.pipeline.pop_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_live_and_targetter_extensions_are_independent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[targetter]
image_extensions = ["jpg"]
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.targetter.image_extensions, vec!["jpg".to_string()]);
        assert_eq!(config.live.image_extensions, default_image_extensions());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.pipeline.detect_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }
}
