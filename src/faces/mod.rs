pub mod decoder;
pub mod detector;
pub mod nms;
pub mod processor;
pub mod recognizer;
pub mod trainer;

pub use decoder::{BoundingBox, BoundingBoxDecoder};
pub use detector::{crop_face, Detector, OnnxDetector, RawDetection};
pub use nms::{compute_iou, NmsDeduplicator};
pub use processor::{FacePackager, PackagingSummary};
pub use recognizer::{LbphRecognizer, Prediction, Recognizer};
pub use trainer::FaceTrainer;
