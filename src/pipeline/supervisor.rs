use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::producer::SharedSource;
use super::signal::StopSignal;
use super::stage::Stage;
use crate::error::{RecallerError, Result};

/// Default interval between liveness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Why the pipeline shut down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The stop signal was set from outside (interrupt or caller request).
    Requested,
    /// A stage ended while the pipeline was meant to be running.
    StageExited(String),
}

/// How a single stage thread ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageState {
    Running,
    Stopped,
    Panicked(String),
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    pub state: StageState,
    pub uptime: Duration,
}

#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    pub stages: Vec<StageReport>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.reason == ShutdownReason::Requested
            && self.stages.iter().all(|s| s.state == StageState::Stopped)
    }
}

/// A spawned stage thread.
struct StageHandle {
    name: String,
    handle: JoinHandle<()>,
    started_at: Instant,
}

impl StageHandle {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn join(self) -> StageReport {
        let uptime = self.started_at.elapsed();
        let state = match self.handle.join() {
            Ok(()) => StageState::Stopped,
            Err(panic) => StageState::Panicked(panic_message(panic.as_ref())),
        };
        StageReport {
            name: self.name,
            state,
            uptime,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Starts the stages, watches them, and drives a coordinated shutdown.
pub struct Supervisor {
    source: SharedSource,
    stop: StopSignal,
    stages: Vec<Box<dyn Stage>>,
    poll_interval: Duration,
    source_released: bool,
}

impl Supervisor {
    pub fn new(source: SharedSource, stop: StopSignal) -> Self {
        Self {
            source,
            stop,
            stages: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            source_released: false,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn add_stage(&mut self, stage: impl Stage) {
        self.stages.push(Box::new(stage));
    }

    /// Handle for requesting shutdown from another thread (e.g. an interrupt handler).
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run the pipeline until the stop signal is set or a stage dies.
    ///
    /// Every stage is set up before any thread starts; a setup failure
    /// releases the frame source and returns without running anything.
    pub fn run(mut self) -> Result<ShutdownReport> {
        if let Err(e) = self.setup_all() {
            self.stop.trigger();
            self.release_source();
            return Err(e);
        }

        let handles = match self.spawn_all() {
            Ok(handles) => handles,
            Err((e, handles)) => {
                self.stop.trigger();
                for handle in handles {
                    handle.join();
                }
                self.release_source();
                return Err(e);
            }
        };
        info!(stages = handles.len(), "System running");

        let reason = self.watch(&handles);

        info!("Waiting for stages to finish");
        let stages: Vec<StageReport> = handles.into_iter().map(StageHandle::join).collect();
        for report in &stages {
            if let StageState::Panicked(msg) = &report.state {
                error!(stage = %report.name, panic = %msg, "Stage panicked");
            }
        }

        info!("Releasing frame source");
        self.release_source();

        info!(reason = ?reason, "All stages stopped");
        Ok(ShutdownReport { reason, stages })
    }

    fn setup_all(&mut self) -> Result<()> {
        for i in 0..self.stages.len() {
            let stage = &mut self.stages[i];
            info!(stage = %stage.name(), "Setting up stage");
            if let Err(e) = stage.setup() {
                error!(stage = %stage.name(), error = %e, "Stage setup failed");
                // Stages set up so far will never run their own teardown.
                for ready in self.stages[..i].iter_mut().rev() {
                    ready.teardown();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn spawn_all(
        &mut self,
    ) -> std::result::Result<Vec<StageHandle>, (RecallerError, Vec<StageHandle>)> {
        let mut handles = Vec::with_capacity(self.stages.len());

        for stage in self.stages.drain(..) {
            let name = stage.name().to_string();
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || stage.run());

            match spawned {
                Ok(handle) => handles.push(StageHandle {
                    name,
                    handle,
                    started_at: Instant::now(),
                }),
                Err(e) => return Err((RecallerError::Io(e), handles)),
            }
        }

        Ok(handles)
    }

    fn watch(&self, handles: &[StageHandle]) -> ShutdownReason {
        loop {
            if self.stop.is_set() {
                info!("Shutdown signal received");
                return ShutdownReason::Requested;
            }

            if let Some(dead) = handles.iter().find(|h| !h.is_running()) {
                // Re-check: a stage may have exited because stop was set meanwhile.
                if self.stop.trigger() {
                    warn!(stage = %dead.name, "Stage terminated unexpectedly, shutting down");
                    return ShutdownReason::StageExited(dead.name.clone());
                }
                return ShutdownReason::Requested;
            }

            thread::sleep(self.poll_interval);
        }
    }

    fn release_source(&mut self) {
        if self.source_released {
            return;
        }
        self.source_released = true;

        match self.source.lock() {
            Ok(mut source) => source.release(),
            Err(poisoned) => poisoned.into_inner().release(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::pipeline::producer::tests::CountingSource;
    use crate::pipeline::producer::{shared_source, FrameProducer};
    use crate::pipeline::stage::{PipelineStage, Transform};
    use crate::pipeline::{BoundedQueue, FramePayload, OverflowPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const POP_TIMEOUT: Duration = Duration::from_millis(20);
    const POLL: Duration = Duration::from_millis(10);

    /// Counts frames; panics on the frame id given in `panic_on`.
    struct FrameCounter {
        seen: Arc<AtomicUsize>,
        panic_on: Option<u64>,
        fail_setup: bool,
    }

    impl FrameCounter {
        fn new(seen: Arc<AtomicUsize>) -> Self {
            Self { seen, panic_on: None, fail_setup: false }
        }
    }

    impl Transform for FrameCounter {
        type Input = FramePayload;
        type Output = u64;

        fn setup(&mut self) -> Result<()> {
            if self.fail_setup {
                return Err(RecallerError::model_load("detector", "weights missing"));
            }
            Ok(())
        }

        fn apply(&mut self, frame: FramePayload) -> Result<Vec<u64>> {
            if self.panic_on == Some(frame.frame_id) {
                panic!("counter blew up on frame {}", frame.frame_id);
            }
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(vec![frame.frame_id])
        }
    }

    struct Sink;

    impl Transform for Sink {
        type Input = u64;
        type Output = ();

        fn apply(&mut self, _id: u64) -> Result<Vec<()>> {
            Ok(Vec::new())
        }
    }

    fn build(
        source: CountingSource,
        counter: FrameCounter,
    ) -> Supervisor {
        let stop = StopSignal::new();
        let detect = Arc::new(BoundedQueue::new(5, OverflowPolicy::DropOldest));
        let ids = Arc::new(BoundedQueue::new(5, OverflowPolicy::DropNewest));

        let source = shared_source(source);
        let mut supervisor = Supervisor::new(Arc::clone(&source), stop.clone()).with_poll_interval(POLL);
        supervisor.add_stage(FrameProducer::new(source, stop.clone()).with_output(Arc::clone(&detect)));
        supervisor.add_stage(
            PipelineStage::new("counter", detect, counter, stop.clone())
                .with_output(Arc::clone(&ids))
                .with_pop_timeout(POP_TIMEOUT),
        );
        supervisor.add_stage(PipelineStage::new("sink", ids, Sink, stop).with_pop_timeout(POP_TIMEOUT));
        supervisor
    }

    #[test]
    fn test_requested_shutdown_is_bounded() {
        let (source, releases) = CountingSource::new(None);
        let seen = Arc::new(AtomicUsize::new(0));
        let supervisor = build(source, FrameCounter::new(Arc::clone(&seen)));
        let stop = supervisor.stop_signal();

        let runner = thread::spawn(move || supervisor.run());
        thread::sleep(Duration::from_millis(100));

        let requested_at = Instant::now();
        stop.trigger();
        let report = runner.join().unwrap().unwrap();

        assert!(requested_at.elapsed() < POP_TIMEOUT * 10 + POLL);
        assert_eq!(report.reason, ShutdownReason::Requested);
        assert!(report.is_clean());
        assert_eq!(report.stages.len(), 3);
        assert!(seen.load(Ordering::SeqCst) > 0);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_source_failure_triggers_shutdown() {
        let (source, releases) = CountingSource::new(Some(5));
        let supervisor = build(source, FrameCounter::new(Arc::new(AtomicUsize::new(0))));
        let stop = supervisor.stop_signal();

        let report = supervisor.run().unwrap();

        assert!(stop.is_set());
        assert_eq!(report.reason, ShutdownReason::StageExited("producer".to_string()));
        assert!(report.stages.iter().all(|s| s.state == StageState::Stopped));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_stage_triggers_shutdown() {
        let (source, releases) = CountingSource::new(None);
        let mut counter = FrameCounter::new(Arc::new(AtomicUsize::new(0)));
        counter.panic_on = Some(2);
        let supervisor = build(source, counter);
        let stop = supervisor.stop_signal();

        let report = supervisor.run().unwrap();

        assert!(stop.is_set());
        assert_eq!(report.reason, ShutdownReason::StageExited("counter".to_string()));
        let counter = report.stages.iter().find(|s| s.name == "counter").unwrap();
        assert!(matches!(&counter.state, StageState::Panicked(msg) if msg.contains("frame 2")));
        assert!(!report.is_clean());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_setup_failure_starts_nothing() {
        let (source, releases) = CountingSource::new(None);
        let mut counter = FrameCounter::new(Arc::new(AtomicUsize::new(0)));
        counter.fail_setup = true;
        let supervisor = build(source, counter);

        let err = supervisor.run().unwrap_err();

        assert!(matches!(err, RecallerError::ModelLoad { ref resource, .. } if resource == "detector"));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    /// Passes frames through and counts teardowns.
    struct Loaded {
        teardowns: Arc<AtomicUsize>,
    }

    impl Transform for Loaded {
        type Input = FramePayload;
        type Output = FramePayload;

        fn apply(&mut self, frame: FramePayload) -> Result<Vec<FramePayload>> {
            Ok(vec![frame])
        }

        fn teardown(&mut self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_setup_failure_tears_down_ready_stages() {
        let (source, releases) = CountingSource::new(None);
        let stop = StopSignal::new();
        let frames = Arc::new(BoundedQueue::new(5, OverflowPolicy::DropOldest));
        let passed = Arc::new(BoundedQueue::new(5, OverflowPolicy::DropNewest));
        let teardowns = Arc::new(AtomicUsize::new(0));

        let mut counter = FrameCounter::new(Arc::new(AtomicUsize::new(0)));
        counter.fail_setup = true;

        let mut supervisor = Supervisor::new(shared_source(source), stop.clone()).with_poll_interval(POLL);
        supervisor.add_stage(
            PipelineStage::new("loaded", frames, Loaded { teardowns: Arc::clone(&teardowns) }, stop.clone())
                .with_output(Arc::clone(&passed)),
        );
        supervisor.add_stage(PipelineStage::new("counter", passed, counter, stop.clone()));

        assert!(supervisor.run().is_err());
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(stop.is_set());
    }
}
