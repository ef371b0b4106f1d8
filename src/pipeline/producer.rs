use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use super::payload::FramePayload;
use super::queue::{BoundedQueue, PushOutcome};
use super::signal::StopSignal;
use super::stage::Stage;
use crate::error::{RecallerError, Result};
use crate::source::FrameSource;

/// Frame source shared between the supervisor (which releases it) and the producer (which reads it).
pub type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

pub fn shared_source(source: impl FrameSource + 'static) -> SharedSource {
    Arc::new(Mutex::new(Box::new(source)))
}

/// Head of the pipeline: reads frames and fans them out to the detection queues.
pub struct FrameProducer {
    name: String,
    source: SharedSource,
    outputs: Vec<Arc<BoundedQueue<FramePayload>>>,
    stop: StopSignal,
    next_frame_id: u64,
}

impl FrameProducer {
    pub fn new(source: SharedSource, stop: StopSignal) -> Self {
        Self {
            name: "producer".to_string(),
            source,
            outputs: Vec::new(),
            stop,
            next_frame_id: 0,
        }
    }

    /// Add a downstream queue. Each queue applies its own overflow policy.
    pub fn with_output(mut self, queue: Arc<BoundedQueue<FramePayload>>) -> Self {
        self.outputs.push(queue);
        self
    }

    /// Read one frame, stamp it and enqueue it everywhere. Returns the assigned frame id.
    pub fn produce_one(&mut self) -> Result<u64> {
        let image = {
            let mut source = self.source.lock().map_err(|_| {
                RecallerError::SourceUnavailable("frame source lock poisoned".to_string())
            })?;
            source.read_frame()?
        };

        let now = Utc::now();
        let payload = FramePayload {
            frame_id: self.next_frame_id,
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            image: Arc::new(image),
        };
        self.next_frame_id += 1;

        let frame_id = payload.frame_id;
        for queue in &self.outputs {
            match queue.push(payload.clone()) {
                PushOutcome::Enqueued => {}
                PushOutcome::Evicted(stale) => {
                    debug!(frame_id, stale_frame_id = stale.frame_id, "Queue full, stale frame dropped");
                }
                PushOutcome::Rejected(_) => {
                    warn!(frame_id, "Queue full, frame dropped");
                }
            }
        }

        Ok(frame_id)
    }
}

impl Stage for FrameProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn run(mut self: Box<Self>) {
        info!(stage = %self.name, outputs = self.outputs.len(), "Starting frame capture");

        while !self.stop.is_set() {
            if let Err(e) = self.produce_one() {
                // A source that cannot produce frames is not retried.
                error!(stage = %self.name, error = %e, "Error reading frame");
                break;
            }
        }

        info!(stage = %self.name, frames = self.next_frame_id, "Frame capture stopped");
    }
}
