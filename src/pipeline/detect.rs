use image::GenericImageView;
use tracing::debug;

use super::payload::{FaceCrop, FramePayload};
use super::stage::Transform;
use crate::error::Result;
use crate::faces::{crop_face, BoundingBoxDecoder, Detector, NmsDeduplicator};

/// Frame → face crops: infer, decode the face class, optionally dedup, crop.
pub struct DetectionTransform<D: Detector> {
    detector: D,
    decoder: BoundingBoxDecoder,
    nms: NmsDeduplicator,
    face_class_id: usize,
    face_size: u32,
}

impl<D: Detector + 'static> DetectionTransform<D> {
    pub fn new(
        detector: D,
        decoder: BoundingBoxDecoder,
        nms: NmsDeduplicator,
        face_class_id: usize,
        face_size: u32,
    ) -> Self {
        Self {
            detector,
            decoder,
            nms,
            face_class_id,
            face_size,
        }
    }
}

impl<D: Detector + 'static> Transform for DetectionTransform<D> {
    type Input = FramePayload;
    type Output = FaceCrop;

    fn setup(&mut self) -> Result<()> {
        self.detector.load()
    }

    fn apply(&mut self, frame: FramePayload) -> Result<Vec<FaceCrop>> {
        let image = frame.image.as_ref();
        let (width, height) = image.dimensions();

        let raw = self.detector.infer(image)?;
        let boxes = self
            .decoder
            .decode_class(&raw, width, height, self.face_class_id);
        let boxes = self.nms.dedup(boxes);

        let crops: Vec<FaceCrop> = boxes
            .iter()
            .filter_map(|bbox| crop_face(image, bbox, self.face_size))
            .map(|face| FaceCrop {
                frame_id: frame.frame_id,
                timestamp: frame.timestamp,
                image: face,
            })
            .collect();

        if !crops.is_empty() {
            debug!(frame_id = frame.frame_id, faces = crops.len(), "Faces detected");
        }
        Ok(crops)
    }

    fn teardown(&mut self) {
        self.detector.unload();
    }
}
