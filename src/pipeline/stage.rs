use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::queue::{BoundedQueue, PushOutcome};
use super::signal::StopSignal;
use crate::error::Result;

/// Default wait on an empty input before the stop signal is checked again.
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-item work done by a pipeline stage.
pub trait Transform: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Load models and other resources. Runs once, before the stage loop.
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Process one item. An error drops the item; the stage keeps running.
    fn apply(&mut self, input: Self::Input) -> Result<Vec<Self::Output>>;

    /// Release resources acquired in `setup`.
    fn teardown(&mut self) {}
}

/// Anything the supervisor can prepare and then run on its own thread.
pub trait Stage: Send + 'static {
    fn name(&self) -> &str;

    /// One-time preparation. A failure here keeps the whole pipeline from starting.
    fn setup(&mut self) -> Result<()>;

    /// Run until the stop signal is set or the stage cannot continue.
    fn run(self: Box<Self>);

    /// Undo `setup` for a stage that will never run.
    fn teardown(&mut self) {}
}

/// Generic stage loop: pop from the input, transform, push downstream.
pub struct PipelineStage<T: Transform> {
    name: String,
    input: Arc<BoundedQueue<T::Input>>,
    output: Option<Arc<BoundedQueue<T::Output>>>,
    stop: StopSignal,
    pop_timeout: Duration,
    transform: T,
    ready: bool,
}

impl<T: Transform> PipelineStage<T> {
    pub fn new(
        name: impl Into<String>,
        input: Arc<BoundedQueue<T::Input>>,
        transform: T,
        stop: StopSignal,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output: None,
            stop,
            pop_timeout: DEFAULT_POP_TIMEOUT,
            transform,
            ready: false,
        }
    }

    /// Forward transform outputs to `queue`, using the queue's overflow policy.
    pub fn with_output(mut self, queue: Arc<BoundedQueue<T::Output>>) -> Self {
        self.output = Some(queue);
        self
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    fn run_loop(&mut self) {
        info!(stage = %self.name, "Stage started");
        let mut processed = 0u64;
        let mut failed = 0u64;

        while !self.stop.is_set() {
            let Some(item) = self.input.pop_timeout(self.pop_timeout) else {
                continue;
            };

            match self.transform.apply(item) {
                Ok(outputs) => {
                    processed += 1;
                    self.forward(outputs);
                }
                Err(e) => {
                    failed += 1;
                    warn!(stage = %self.name, error = %e, "Item dropped after processing error");
                }
            }
        }

        // Remaining input is abandoned on purpose; shutdown must not wait on it.
        self.transform.teardown();
        info!(stage = %self.name, processed, failed, "Stage stopped");
    }

    fn forward(&self, outputs: Vec<T::Output>) {
        let Some(queue) = &self.output else {
            return;
        };

        for output in outputs {
            match queue.push(output) {
                PushOutcome::Enqueued => {}
                PushOutcome::Evicted(_) => {
                    debug!(stage = %self.name, "Downstream queue full, oldest item dropped");
                }
                PushOutcome::Rejected(_) => {
                    warn!(stage = %self.name, "Downstream queue full, item dropped");
                }
            }
        }
    }
}

impl<T: Transform> Stage for PipelineStage<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self) -> Result<()> {
        if !self.ready {
            self.transform.setup()?;
            self.ready = true;
        }
        Ok(())
    }

    fn run(mut self: Box<Self>) {
        if let Err(e) = self.setup() {
            error!(stage = %self.name, error = %e, "Stage setup failed");
            return;
        }
        self.run_loop();
    }

    fn teardown(&mut self) {
        if self.ready {
            self.transform.teardown();
            self.ready = false;
            debug!(stage = %self.name, "Stage torn down before running");
        }
    }
}
