//! Threaded frame pipeline: producer → detection → recognition over bounded queues.

pub mod detect;
pub mod payload;
pub mod producer;
pub mod queue;
pub mod recognize;
pub mod signal;
pub mod stage;
pub mod supervisor;

pub use detect::DetectionTransform;
pub use payload::{FaceCrop, FramePayload, Recognition};
pub use producer::{shared_source, FrameProducer, SharedSource};
pub use queue::{BoundedQueue, OverflowPolicy, PushOutcome};
pub use recognize::RecognitionTransform;
pub use signal::StopSignal;
pub use stage::{PipelineStage, Stage, Transform};
pub use supervisor::{ShutdownReason, ShutdownReport, StageReport, StageState, Supervisor};
