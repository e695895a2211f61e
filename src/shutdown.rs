// Pipeline lifecycle and cooperative cancellation
//
// The coordinator is a cheaply-cloneable token shared by every worker.
// Workers poll it at each loop iteration and at each bounded wait; the
// signal handler's only job is to call `begin_drain`. The lifecycle moves
// Running -> Draining -> Stopped exactly once and never reverses.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Process-wide pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
    Stopped,
}

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const STOPPED: u8 = 2;

struct CoordinatorInner {
    state: AtomicU8,
    forced: AtomicBool,
    fatal: Mutex<Option<String>>,
}

/// Shared shutdown coordinator and cancellation token.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                state: AtomicU8::new(RUNNING),
                forced: AtomicBool::new(false),
                fatal: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> PipelineState {
        match self.inner.state.load(Ordering::SeqCst) {
            RUNNING => PipelineState::Running,
            DRAINING => PipelineState::Draining,
            _ => PipelineState::Stopped,
        }
    }

    /// Request a clean shutdown. Idempotent: only the first call wins,
    /// and the return value says whether this call was the trigger.
    pub fn begin_drain(&self) -> bool {
        let triggered = self
            .inner
            .state
            .compare_exchange(RUNNING, DRAINING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if triggered {
            log::info!("shutdown requested, draining pipeline");
        }
        triggered
    }

    /// Record a fatal error and trigger drain. The first recorded reason
    /// is kept; later fatals are logged by their stage but do not replace it.
    pub fn record_fatal(&self, stage: &str, message: impl Into<String>) {
        let message = message.into();
        log::error!("fatal error in {} stage: {}", stage, message);
        {
            let mut fatal = self.inner.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(format!("{}: {}", stage, message));
            }
        }
        self.begin_drain();
    }

    /// Escalate to a forced stop: workers abandon any remaining drain work
    /// at their next poll point. Also begins draining if nothing had.
    pub fn escalate(&self) {
        self.begin_drain();
        if !self.inner.forced.swap(true, Ordering::SeqCst) {
            log::warn!("forced stop requested, abandoning remaining drain work");
        }
    }

    /// Mark the pipeline fully stopped. One-way; called once by the
    /// pipeline after every worker has finished.
    pub fn mark_stopped(&self) {
        self.inner.state.store(STOPPED, Ordering::SeqCst);
    }

    /// True once a drain (clean or forced) has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) != RUNNING
    }

    pub fn is_forced(&self) -> bool {
        self.inner.forced.load(Ordering::SeqCst)
    }

    /// The first fatal reason recorded, if the shutdown was error-driven.
    pub fn fatal_reason(&self) -> Option<String> {
        self.inner.fatal.lock().clone()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_drain_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.state(), PipelineState::Running);
        assert!(!coordinator.is_cancelled());

        assert!(coordinator.begin_drain());
        assert!(!coordinator.begin_drain());
        assert_eq!(coordinator.state(), PipelineState::Draining);
        assert!(coordinator.is_cancelled());
    }

    #[test]
    fn lifecycle_never_reverses() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.begin_drain();
        coordinator.mark_stopped();
        assert_eq!(coordinator.state(), PipelineState::Stopped);
        // A late drain request cannot resurrect a stopped pipeline.
        assert!(!coordinator.begin_drain());
        assert_eq!(coordinator.state(), PipelineState::Stopped);
    }

    #[test]
    fn first_fatal_reason_is_kept() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.record_fatal("capture", "source exhausted");
        coordinator.record_fatal("process", "disk full");
        let reason = coordinator.fatal_reason().unwrap();
        assert!(reason.contains("capture"));
        assert_eq!(coordinator.state(), PipelineState::Draining);
    }

    #[test]
    fn escalate_forces_and_drains() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_forced());
        coordinator.escalate();
        assert!(coordinator.is_forced());
        assert!(coordinator.is_cancelled());
        // Clones observe the same state.
        let clone = coordinator.clone();
        assert!(clone.is_forced());
    }
}
