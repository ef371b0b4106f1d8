use super::decoder::BoundingBox;

/// Greedy non-maximum suppression over boxes of a single class.
#[derive(Debug, Clone, Copy)]
pub struct NmsDeduplicator {
    iou_threshold: f32,
    enabled: bool,
}

impl NmsDeduplicator {
    pub fn new(iou_threshold: f32, enabled: bool) -> Self {
        Self { iou_threshold, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Remove near-duplicate boxes.
    ///
    /// When disabled the input comes back untouched; overlapping crops of the
    /// same face are then kept as extra samples. When enabled the result is in
    /// descending confidence order, equal confidences keeping their input order.
    pub fn dedup(&self, mut boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
        if !self.enabled {
            return boxes;
        }

        // sort_by is stable, so ties keep first-seen order
        boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut keep = Vec::new();
        let mut suppressed = vec![false; boxes.len()];

        for i in 0..boxes.len() {
            if suppressed[i] {
                continue;
            }

            keep.push(boxes[i]);

            for j in (i + 1)..boxes.len() {
                if suppressed[j] {
                    continue;
                }

                if compute_iou(&boxes[i], &boxes[j]) > self.iou_threshold {
                    suppressed[j] = true;
                }
            }
        }

        keep
    }
}

/// Compute Intersection over Union between two bounding boxes
pub fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.right().min(b.right());
    let y2 = a.bottom().min(b.bottom());

    let intersection = if x2 > x1 && y2 > y1 {
        (x2 - x1) as u64 * (y2 - y1) as u64
    } else {
        0
    };
    let union = a.area() + b.area() - intersection;

    if union > 0 {
        intersection as f32 / union as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: u32, y: u32, width: u32, height: u32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width, height, confidence, class_id: 1 }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0, 0, 10, 10, 0.9);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 0.001);

        let c = bbox(20, 20, 10, 10, 0.9);
        assert!((compute_iou(&a, &c) - 0.0).abs() < 0.001);

        // Half overlap: 50 / 150
        let d = bbox(5, 0, 10, 10, 0.9);
        assert!((compute_iou(&a, &d) - 1.0 / 3.0).abs() < 0.001);
    }

    #[test]
    fn test_heavy_overlap_keeps_most_confident() {
        // 100x100 boxes offset by 5px: IoU = 9500 / 10500 ≈ 0.905
        let low = bbox(5, 0, 100, 100, 0.4);
        let high = bbox(0, 0, 100, 100, 0.9);
        assert!(compute_iou(&low, &high) > 0.9);

        let nms = NmsDeduplicator::new(0.3, true);
        assert_eq!(nms.dedup(vec![low, high]), vec![high]);
    }

    #[test]
    fn test_light_overlap_keeps_both() {
        // 10x10 boxes sharing a 2x10 strip: IoU = 20 / 180 ≈ 0.11
        let a = bbox(0, 0, 10, 10, 0.9);
        let b = bbox(8, 0, 10, 10, 0.4);
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.1 && iou < 0.12);

        let nms = NmsDeduplicator::new(0.3, true);
        assert_eq!(nms.dedup(vec![b, a]), vec![a, b]);
    }

    #[test]
    fn test_disabled_returns_input() {
        let boxes = vec![
            bbox(0, 0, 10, 10, 0.4),
            bbox(1, 1, 10, 10, 0.9),
            bbox(0, 0, 10, 10, 0.7),
        ];
        let nms = NmsDeduplicator::new(0.3, false);
        assert_eq!(nms.dedup(boxes.clone()), boxes);
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let first = bbox(0, 0, 10, 10, 0.8);
        let second = bbox(1, 0, 10, 10, 0.8);
        let nms = NmsDeduplicator::new(0.3, true);
        assert_eq!(nms.dedup(vec![first, second]), vec![first]);
    }

    #[test]
    fn test_chain_suppression() {
        // b overlaps both a and c heavily, a and c barely touch.
        let a = bbox(0, 0, 10, 10, 0.9);
        let b = bbox(4, 0, 10, 10, 0.8);
        let c = bbox(8, 0, 10, 10, 0.7);

        let nms = NmsDeduplicator::new(0.3, true);
        assert_eq!(nms.dedup(vec![c, b, a]), vec![a, c]);
    }

    #[test]
    fn test_guarantees_and_idempotence() {
        let boxes: Vec<BoundingBox> = (0..40u32)
            .map(|i| {
                let confidence = ((i * 37) % 100) as f32 / 100.0;
                bbox((i * 13) % 90, (i * 7) % 60, 20 + i % 15, 20 + (i * 3) % 15, confidence)
            })
            .collect();
        let best = boxes
            .iter()
            .copied()
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())
            .unwrap();

        let nms = NmsDeduplicator::new(0.3, true);
        let kept = nms.dedup(boxes);

        assert_eq!(kept[0].confidence, best.confidence);
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                assert!(compute_iou(a, b) <= 0.3);
            }
        }
        assert_eq!(nms.dedup(kept.clone()), kept);
    }

    #[test]
    fn test_nan_confidence_does_not_panic() {
        let a = bbox(0, 0, 10, 10, f32::NAN);
        let b = bbox(40, 0, 10, 10, 0.9);
        let c = bbox(80, 0, 10, 10, 0.5);

        let nms = NmsDeduplicator::new(0.3, true);
        let kept = nms.dedup(vec![c, a, b]);

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[1..], [b, c]);
        assert!(kept[0].confidence.is_nan());
    }

    #[test]
    fn test_empty_input() {
        let nms = NmsDeduplicator::new(0.3, true);
        assert!(nms.dedup(Vec::new()).is_empty());
    }
}
