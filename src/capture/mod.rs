//! Frame acquisition
//!
//! The capture worker pulls frames from a [`FrameSource`] at the configured
//! cadence, tags each with a strictly increasing sequence number and a
//! wall-clock timestamp, and pushes it into the frame ring. The worker is
//! the ring's only producer and never blocks on it: backpressure is
//! absorbed by the ring's overwrite-oldest policy.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::Sender;

use crate::buffer::{FrameRing, PushOutcome};
use crate::frame::Frame;
use crate::pipeline::PipelineEvent;
use crate::shutdown::ShutdownCoordinator;

pub mod synthetic;
#[cfg(feature = "gstreamer")]
pub mod gst;

pub use synthetic::SyntheticSource;

/// Error type for frame acquisition.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The source ended (end-of-stream or unrecoverable device failure).
    /// Fatal: triggers pipeline shutdown. Reconnecting is the source
    /// collaborator's concern, not the pipeline's.
    #[error("frame source exhausted: {0}")]
    Exhausted(String),

    /// A single frame read failed; the source is still usable.
    #[error("transient source error: {0}")]
    Transient(String),
}

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

/// An untagged frame as delivered by a source: RGB24 pixels plus
/// dimensions. The capture stage adds sequence and timestamp.
pub struct SourceFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A producer of raw frames, the camera collaborator's interface.
pub trait FrameSource: Send {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Acquire the next frame. Blocks at most briefly; long device waits
    /// must be bounded inside the source so shutdown stays responsive.
    fn next_frame(&mut self) -> CaptureResult<SourceFrame>;
}

/// Transient failures tolerated back-to-back before the source is
/// declared dead. A camera that never returns another frame is
/// indistinguishable from end-of-stream.
const MAX_CONSECUTIVE_FAILURES: u32 = 100;

/// Sleep slice while waiting for the next capture deadline, kept short so
/// cancellation is observed promptly.
const PACING_SLICE: Duration = Duration::from_millis(20);

/// Window over which the achieved frame rate is measured.
const FPS_WINDOW: Duration = Duration::from_secs(5);

/// Achieved-rate fraction of the target below which a warning is logged.
const LOW_FPS_FRACTION: f64 = 0.8;

/// Final accounting from the capture worker.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSummary {
    pub frames_captured: u64,
    pub frames_skipped: u64,
}

/// Spawn the capture worker thread.
pub fn spawn(
    source: Box<dyn FrameSource>,
    ring: Arc<FrameRing>,
    coordinator: ShutdownCoordinator,
    events: Sender<PipelineEvent>,
    target_fps: f64,
) -> std::io::Result<JoinHandle<CaptureSummary>> {
    std::thread::Builder::new()
        .name("vigil-capture".into())
        .spawn(move || capture_loop(source, ring, coordinator, events, target_fps))
}

fn capture_loop(
    mut source: Box<dyn FrameSource>,
    ring: Arc<FrameRing>,
    coordinator: ShutdownCoordinator,
    events: Sender<PipelineEvent>,
    target_fps: f64,
) -> CaptureSummary {
    log::info!(
        "capture started: {} at {:.1} fps target",
        source.describe(),
        target_fps
    );

    let interval = Duration::from_secs_f64(1.0 / target_fps.max(0.001));
    let mut next_deadline = Instant::now();
    let mut sequence: u64 = 0;
    let mut consecutive_failures: u32 = 0;
    let mut summary = CaptureSummary {
        frames_captured: 0,
        frames_skipped: 0,
    };

    let mut window_start = Instant::now();
    let mut window_frames: u64 = 0;

    loop {
        if coordinator.is_cancelled() {
            log::info!("capture observing shutdown, stopping acquisition");
            break;
        }

        // Hold the acquisition cadence without drifting. When the source
        // or the scheduler falls behind, resynchronize to now instead of
        // trying to catch up with a burst.
        let now = Instant::now();
        if now < next_deadline {
            let remaining = next_deadline - now;
            std::thread::sleep(remaining.min(PACING_SLICE));
            continue;
        }
        next_deadline += interval;
        if next_deadline + interval < now {
            next_deadline = now;
        }

        let raw = match source.next_frame() {
            Ok(raw) => {
                consecutive_failures = 0;
                raw
            }
            Err(CaptureError::Transient(reason)) => {
                consecutive_failures += 1;
                summary.frames_skipped += 1;
                log::warn!(
                    "frame read failed after frame {} ({}), skipping",
                    sequence,
                    reason
                );
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    coordinator.record_fatal(
                        "capture",
                        format!(
                            "{} consecutive read failures, source presumed dead",
                            consecutive_failures
                        ),
                    );
                    break;
                }
                continue;
            }
            Err(CaptureError::Exhausted(reason)) => {
                coordinator.record_fatal("capture", format!("source exhausted: {}", reason));
                break;
            }
        };

        sequence += 1;
        let Some(frame) = Frame::from_rgb(raw.pixels, raw.width, raw.height, Utc::now(), sequence)
        else {
            summary.frames_skipped += 1;
            log::warn!(
                "source delivered a malformed frame ({}x{}) at sequence {}, skipping",
                raw.width,
                raw.height,
                sequence
            );
            continue;
        };

        match ring.push(frame) {
            PushOutcome::Stored => {}
            PushOutcome::DroppedOldest(evicted) => {
                log::debug!(
                    "ring full at frame {}, evicted frame {} (total drops: {})",
                    sequence,
                    evicted,
                    ring.dropped_count()
                );
            }
            PushOutcome::Rejected => {
                // The ring closed under us; shutdown is already underway.
                break;
            }
        }
        summary.frames_captured += 1;
        window_frames += 1;

        let elapsed = window_start.elapsed();
        if elapsed >= FPS_WINDOW {
            let actual = window_frames as f64 / elapsed.as_secs_f64();
            if actual < target_fps * LOW_FPS_FRACTION {
                log::warn!(
                    "source delivering {:.1} fps, well below the {:.1} fps target",
                    actual,
                    target_fps
                );
            }
            window_start = Instant::now();
            window_frames = 0;
        }
    }

    // The producer closes the ring: no more pushes will ever arrive, and
    // the consumer can finish draining what is buffered.
    ring.close();
    let _ = events.send(PipelineEvent::CaptureEnded {
        frames_captured: summary.frames_captured,
    });
    log::info!(
        "capture stopped: {} frames captured, {} skipped",
        summary.frames_captured,
        summary.frames_skipped
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    /// Source that yields a fixed number of frames, then reports exhaustion.
    struct FiniteSource {
        remaining: u32,
    }

    impl FrameSource for FiniteSource {
        fn describe(&self) -> String {
            "finite test source".into()
        }

        fn next_frame(&mut self) -> CaptureResult<SourceFrame> {
            if self.remaining == 0 {
                return Err(CaptureError::Exhausted("end of stream".into()));
            }
            self.remaining -= 1;
            Ok(SourceFrame {
                pixels: vec![0u8; 4 * 4 * 3],
                width: 4,
                height: 4,
            })
        }
    }

    /// Source that always fails transiently.
    struct FlakySource;

    impl FrameSource for FlakySource {
        fn describe(&self) -> String {
            "flaky test source".into()
        }

        fn next_frame(&mut self) -> CaptureResult<SourceFrame> {
            Err(CaptureError::Transient("no frame".into()))
        }
    }

    #[test]
    fn tags_frames_with_increasing_sequences() {
        let ring = Arc::new(FrameRing::new(64));
        let coordinator = ShutdownCoordinator::new();
        let (tx, _rx) = unbounded();

        let handle = spawn(
            Box::new(FiniteSource { remaining: 10 }),
            Arc::clone(&ring),
            coordinator.clone(),
            tx,
            1000.0,
        )
        .unwrap();
        let summary = handle.join().unwrap();

        assert_eq!(summary.frames_captured, 10);
        let mut last = 0;
        loop {
            match ring.pop(Duration::from_millis(1)) {
                crate::buffer::PopResult::Frame(f) => {
                    assert_eq!(f.sequence(), last + 1);
                    last = f.sequence();
                }
                _ => break,
            }
        }
        assert_eq!(last, 10);
    }

    #[test]
    fn source_exhaustion_triggers_shutdown_and_closes_the_ring() {
        let ring = Arc::new(FrameRing::new(8));
        let coordinator = ShutdownCoordinator::new();
        let (tx, rx) = unbounded();

        let handle = spawn(
            Box::new(FiniteSource { remaining: 2 }),
            Arc::clone(&ring),
            coordinator.clone(),
            tx,
            1000.0,
        )
        .unwrap();
        handle.join().unwrap();

        assert!(coordinator.is_cancelled());
        assert!(coordinator.fatal_reason().unwrap().contains("exhausted"));
        assert!(ring.is_closed());
        assert!(matches!(
            rx.try_recv(),
            Ok(PipelineEvent::CaptureEnded { frames_captured: 2 })
        ));
    }

    #[test]
    fn endless_transient_failures_eventually_turn_fatal() {
        let ring = Arc::new(FrameRing::new(8));
        let coordinator = ShutdownCoordinator::new();
        let (tx, _rx) = unbounded();

        let handle = spawn(
            Box::new(FlakySource),
            Arc::clone(&ring),
            coordinator.clone(),
            tx,
            10_000.0,
        )
        .unwrap();
        let summary = handle.join().unwrap();

        assert_eq!(summary.frames_captured, 0);
        assert_eq!(summary.frames_skipped, MAX_CONSECUTIVE_FAILURES as u64);
        assert!(coordinator.fatal_reason().is_some());
    }

    #[test]
    fn cancellation_stops_capture_promptly() {
        let ring = Arc::new(FrameRing::new(8));
        let coordinator = ShutdownCoordinator::new();
        let (tx, _rx) = unbounded();

        let handle = spawn(
            Box::new(FiniteSource { remaining: u32::MAX }),
            Arc::clone(&ring),
            coordinator.clone(),
            tx,
            30.0,
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(80));
        coordinator.begin_drain();
        let start = Instant::now();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(ring.is_closed());
    }
}
