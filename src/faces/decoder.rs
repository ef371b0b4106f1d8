use super::detector::RawDetection;

/// A detection in pixel space, clamped to the image it was found in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
    pub class_id: usize,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Turns raw detector rows into clamped pixel boxes above a confidence threshold.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBoxDecoder {
    confidence_threshold: f32,
}

impl BoundingBoxDecoder {
    pub fn new(confidence_threshold: f32) -> Self {
        Self { confidence_threshold }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Decode every detection whose best class score is strictly above the threshold.
    ///
    /// Output order follows input order. Boxes that clamp down to nothing are dropped.
    pub fn decode(
        &self,
        detections: &[RawDetection],
        image_width: u32,
        image_height: u32,
    ) -> Vec<BoundingBox> {
        detections
            .iter()
            .filter_map(|detection| self.decode_one(detection, image_width, image_height))
            .collect()
    }

    /// Decode and keep only boxes whose best class is `class_id`.
    pub fn decode_class(
        &self,
        detections: &[RawDetection],
        image_width: u32,
        image_height: u32,
        class_id: usize,
    ) -> Vec<BoundingBox> {
        self.decode(detections, image_width, image_height)
            .into_iter()
            .filter(|bbox| bbox.class_id == class_id)
            .collect()
    }

    fn decode_one(
        &self,
        detection: &RawDetection,
        image_width: u32,
        image_height: u32,
    ) -> Option<BoundingBox> {
        let (class_id, confidence) = argmax(&detection.class_scores)?;
        // Strict: a score equal to the threshold is rejected.
        if !(confidence > self.confidence_threshold) {
            return None;
        }

        let img_w = image_width as i64;
        let img_h = image_height as i64;

        // `as i64` truncates toward zero, matching the detector's integer conversion.
        let center_x = (detection.center_x * image_width as f32) as i64;
        let center_y = (detection.center_y * image_height as f32) as i64;
        let w = (detection.width * image_width as f32) as i64;
        let h = (detection.height * image_height as f32) as i64;

        let x = ((center_x as f64 - w as f64 / 2.0) as i64).max(0);
        let y = ((center_y as f64 - h as f64 / 2.0) as i64).max(0);
        let w = w.min(img_w - x);
        let h = h.min(img_h - y);

        if w <= 0 || h <= 0 {
            return None;
        }

        Some(BoundingBox {
            x: x as u32,
            y: y as u32,
            width: w as u32,
            height: h as u32,
            confidence,
            class_id,
        })
    }
}

/// Index and value of the first maximum. NaN scores never win.
fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if !(score > top) => {}
            _ if score.is_nan() => {}
            _ => best = Some((i, score)),
        }
    }
    best
}
