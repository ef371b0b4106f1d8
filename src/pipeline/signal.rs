use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide stop flag shared by the supervisor and every stage.
///
/// Starts cleared, is set at most once and is never reset.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns true only for the call that actually set it.
    pub fn trigger(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
