use image::DynamicImage;
use std::sync::Arc;

/// A captured frame travelling from the producer to detection.
#[derive(Debug, Clone)]
pub struct FramePayload {
    pub frame_id: u64,
    /// Wall-clock capture time in seconds since the Unix epoch
    pub timestamp: f64,
    pub image: Arc<DynamicImage>,
}

/// A fixed-size face cut out of a frame, tagged with the frame it came from.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub frame_id: u64,
    pub timestamp: f64,
    pub image: DynamicImage,
}

/// What the recognition stage made of one face crop.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub frame_id: u64,
    pub timestamp: f64,
    pub label: i32,
    pub distance: f64,
}
