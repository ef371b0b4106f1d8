//! Wiring for the live pipeline: frame source → detection → recognition.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::faces::{BoundingBoxDecoder, Detector, NmsDeduplicator, OnnxDetector};
use crate::pipeline::{
    shared_source, BoundedQueue, DetectionTransform, FrameProducer, PipelineStage,
    RecognitionTransform, SharedSource, ShutdownReport, StopSignal, Supervisor,
};
use crate::source::{select_camera, DirectoryFrameSource};

/// Where the live frames come from.
#[derive(Debug, Clone, Default)]
pub struct LiveOptions {
    /// Camera index into the configured sources
    pub camera: Option<usize>,
    /// Frame directory that bypasses camera selection
    pub source: Option<PathBuf>,
}

/// Assemble the three-stage pipeline around `source` and `detector`.
pub fn build_supervisor<D: Detector + 'static>(
    config: &Config,
    source: SharedSource,
    detector: D,
    stop: StopSignal,
) -> Supervisor {
    let pipeline = &config.pipeline;
    let detection = &config.detection;

    let detect_queue = Arc::new(BoundedQueue::new(
        pipeline.detect_queue_capacity,
        pipeline.detect_overflow,
    ));
    let face_queue = Arc::new(BoundedQueue::new(
        pipeline.face_queue_capacity,
        pipeline.face_overflow,
    ));

    let producer =
        FrameProducer::new(Arc::clone(&source), stop.clone()).with_output(Arc::clone(&detect_queue));

    let detect = PipelineStage::new(
        "detect",
        detect_queue,
        DetectionTransform::new(
            detector,
            BoundingBoxDecoder::new(detection.confidence_threshold),
            NmsDeduplicator::new(detection.iou_threshold, detection.live_nms),
            detection.face_class_id,
            detection.face_size,
        ),
        stop.clone(),
    )
    .with_output(Arc::clone(&face_queue))
    .with_pop_timeout(pipeline.pop_timeout());

    let recognize = PipelineStage::new(
        "recognize",
        face_queue,
        RecognitionTransform::new(&config.recognition.model_path),
        stop.clone(),
    )
    .with_pop_timeout(pipeline.pop_timeout());

    let mut supervisor = Supervisor::new(source, stop).with_poll_interval(pipeline.poll_interval());
    supervisor.add_stage(producer);
    supervisor.add_stage(detect);
    supervisor.add_stage(recognize);
    supervisor
}

/// Open the selected frame source for live mode.
pub fn open_source(config: &Config, options: &LiveOptions) -> Result<DirectoryFrameSource> {
    let directory = match &options.source {
        Some(dir) => dir.clone(),
        None => select_camera(&config.live, options.camera)?,
    };

    Ok(
        DirectoryFrameSource::open(&directory, &config.live.image_extensions)?
            .looping(config.live.loop_frames)
            .with_interval(std::time::Duration::from_millis(config.live.frame_interval_ms)),
    )
}

/// Run the live pipeline until `stop` is set or a stage fails.
pub fn run_live(config: &Config, options: &LiveOptions, stop: StopSignal) -> Result<ShutdownReport> {
    let source = open_source(config, options)?;
    let detector = OnnxDetector::new(&config.detection.model_path, config.detection.input_size);

    info!(
        model = %config.detection.model_path.display(),
        live_nms = config.detection.live_nms,
        "Starting live pipeline"
    );
    build_supervisor(config, shared_source(source), detector, stop).run()
}
