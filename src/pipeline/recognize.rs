use std::path::PathBuf;
use tracing::info;

use super::payload::{FaceCrop, Recognition};
use super::stage::Transform;
use crate::error::Result;
use crate::faces::{LbphRecognizer, Recognizer};

/// Face crop → identity. Without a trained model it only logs the crops it sees.
pub struct RecognitionTransform {
    model_path: Option<PathBuf>,
    recognizer: Option<Box<dyn Recognizer>>,
}

impl RecognitionTransform {
    /// Load the LBPH model at `model_path` during setup, if the file exists.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: Some(model_path.into()),
            recognizer: None,
        }
    }

    pub fn with_recognizer(recognizer: impl Recognizer + 'static) -> Self {
        Self {
            model_path: None,
            recognizer: Some(Box::new(recognizer)),
        }
    }

    pub fn has_model(&self) -> bool {
        self.recognizer.is_some()
    }
}

impl Transform for RecognitionTransform {
    type Input = FaceCrop;
    type Output = Recognition;

    fn setup(&mut self) -> Result<()> {
        if self.recognizer.is_some() {
            return Ok(());
        }

        match &self.model_path {
            Some(path) if path.exists() => {
                self.recognizer = Some(Box::new(LbphRecognizer::load(path)?));
            }
            Some(path) => {
                info!(model = %path.display(), "No trained recognizer, logging faces only");
            }
            None => {}
        }
        Ok(())
    }

    fn apply(&mut self, face: FaceCrop) -> Result<Vec<Recognition>> {
        let Some(recognizer) = &self.recognizer else {
            info!(frame_id = face.frame_id, timestamp = face.timestamp, "Face received");
            return Ok(Vec::new());
        };

        let prediction = recognizer.predict(&face.image)?;
        info!(
            frame_id = face.frame_id,
            label = prediction.label,
            distance = prediction.distance,
            "Face recognized"
        );

        Ok(vec![Recognition {
            frame_id: face.frame_id,
            timestamp: face.timestamp,
            label: prediction.label,
            distance: prediction.distance,
        }])
    }

    fn teardown(&mut self) {
        self.recognizer = None;
    }
}
