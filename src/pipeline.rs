// Pipeline assembly and supervision
//
// Wires the capture and processing workers around the shared frame ring,
// runs a supervisor that surfaces periodic throughput stats and stage
// events, and turns the workers' final summaries into one report. The
// supervisor never touches frames; the data path is strictly
// capture -> ring -> process.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};

use crate::buffer::FrameRing;
use crate::capture::{self, CaptureSummary, FrameSource};
use crate::config::Config;
use crate::encode::{SegmentEncoder, VideoParams};
use crate::metadata::MetadataWriter;
use crate::motion::MotionDetector;
use crate::process::{self, ProcessSummary};
use crate::segment::{Segment, SegmentWriter};
use crate::shutdown::ShutdownCoordinator;

/// Interval between supervisor stats lines.
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Poll interval while waiting for workers to finish.
const JOIN_POLL: Duration = Duration::from_millis(20);

/// Notifications from the stages to the supervisor.
#[derive(Debug)]
pub enum PipelineEvent {
    CaptureEnded { frames_captured: u64 },
    SegmentFinalized(Segment),
}

/// Aggregate throughput accounting for one pipeline run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub frames_skipped: u64,
    pub frames_dropped: u64,
    pub frames_delivered: u64,
    pub frames_processed: u64,
    pub frames_encoded: u64,
    pub encode_failures: u64,
    pub motion_frames: u64,
    pub segments_finalized: u64,
    pub records_written: u64,
    pub records_dropped: u64,
}

/// Outcome of a completed pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub stats: PipelineStats,
    /// The first fatal error, if the shutdown was error-driven.
    pub fatal: Option<String>,
}

impl PipelineReport {
    pub fn is_clean(&self) -> bool {
        self.fatal.is_none()
    }
}

/// A running pipeline: worker handles plus the shared coordinator.
pub struct PipelineHandle {
    coordinator: ShutdownCoordinator,
    ring: Arc<FrameRing>,
    capture: JoinHandle<CaptureSummary>,
    process: JoinHandle<ProcessSummary>,
    supervisor: JoinHandle<()>,
    drain_timeout: Duration,
}

/// Build and start the full pipeline.
///
/// Output directories are created here; failure to create them is fatal
/// before any worker starts. The returned handle must be `wait()`ed to
/// collect the final report.
pub fn launch(
    config: &Config,
    source: Box<dyn FrameSource>,
    encoder: Box<dyn SegmentEncoder>,
) -> anyhow::Result<PipelineHandle> {
    std::fs::create_dir_all(&config.recordings_dir).map_err(|e| {
        anyhow::anyhow!(
            "recordings directory {} is unusable: {}",
            config.recordings_dir.display(),
            e
        )
    })?;
    std::fs::create_dir_all(&config.metadata_dir).map_err(|e| {
        anyhow::anyhow!(
            "metadata directory {} is unusable: {}",
            config.metadata_dir.display(),
            e
        )
    })?;

    let coordinator = ShutdownCoordinator::new();
    let ring = Arc::new(FrameRing::new(config.buffer_capacity));
    let (events_tx, events_rx) = unbounded();

    let params = VideoParams {
        width: config.frame_width,
        height: config.frame_height,
        fps: config.target_fps,
    };
    let writer = SegmentWriter::new(
        encoder,
        config.recordings_dir.clone(),
        params,
        config.min_free_space_mb,
    );
    let metadata = MetadataWriter::new(config.metadata_dir.clone());
    let detector = MotionDetector::new(config.motion_threshold, config.noise_floor);

    let capture = capture::spawn(
        source,
        Arc::clone(&ring),
        coordinator.clone(),
        events_tx.clone(),
        config.target_fps,
    )?;
    let process = process::spawn(
        Arc::clone(&ring),
        writer,
        metadata,
        detector,
        coordinator.clone(),
        events_tx,
    )?;
    let supervisor = spawn_supervisor(events_rx, Arc::clone(&ring))?;

    log::info!(
        "pipeline started: {}x{} at {:.1} fps, ring capacity {}",
        config.frame_width,
        config.frame_height,
        config.target_fps,
        config.buffer_capacity
    );

    Ok(PipelineHandle {
        coordinator,
        ring,
        capture,
        process,
        supervisor,
        drain_timeout: Duration::from_secs(config.drain_timeout_secs),
    })
}

impl PipelineHandle {
    /// The shared coordinator, for signal handlers and tests.
    pub fn coordinator(&self) -> ShutdownCoordinator {
        self.coordinator.clone()
    }

    /// Request a clean drain-and-stop.
    pub fn shutdown(&self) {
        self.coordinator.begin_drain();
    }

    /// Block until both workers have finished, escalating to a forced
    /// stop if draining exceeds the configured timeout, then assemble
    /// the final report.
    pub fn wait(self) -> PipelineReport {
        let mut drain_started: Option<Instant> = None;

        while !(self.capture.is_finished() && self.process.is_finished()) {
            if self.coordinator.is_cancelled() && !self.coordinator.is_forced() {
                let started = *drain_started.get_or_insert_with(Instant::now);
                if started.elapsed() > self.drain_timeout {
                    log::warn!(
                        "drain did not finish within {:?}, escalating to forced stop",
                        self.drain_timeout
                    );
                    self.coordinator.escalate();
                }
            }
            std::thread::sleep(JOIN_POLL);
        }

        let capture_summary = self.capture.join().unwrap_or_else(|_| {
            log::error!("capture worker panicked");
            CaptureSummary {
                frames_captured: 0,
                frames_skipped: 0,
            }
        });
        let process_summary = self.process.join().unwrap_or_else(|_| {
            log::error!("processing worker panicked");
            ProcessSummary::default()
        });
        // All event senders are gone once both workers exited; the
        // supervisor drains the channel and stops on its own.
        let _ = self.supervisor.join();

        self.coordinator.mark_stopped();

        let stats = PipelineStats {
            frames_captured: capture_summary.frames_captured,
            frames_skipped: capture_summary.frames_skipped,
            frames_dropped: self.ring.dropped_count(),
            frames_delivered: self.ring.delivered_count(),
            frames_processed: process_summary.frames_processed,
            frames_encoded: process_summary.frames_encoded,
            encode_failures: process_summary.encode_failures,
            motion_frames: process_summary.motion_frames,
            segments_finalized: process_summary.segments_finalized,
            records_written: process_summary.records_written,
            records_dropped: process_summary.records_dropped,
        };

        log::info!(
            "pipeline stopped: {} captured, {} dropped, {} encoded, {} motion frames, {} segments",
            stats.frames_captured,
            stats.frames_dropped,
            stats.frames_encoded,
            stats.motion_frames,
            stats.segments_finalized
        );

        PipelineReport {
            stats,
            fatal: self.coordinator.fatal_reason(),
        }
    }
}

fn spawn_supervisor(
    events: Receiver<PipelineEvent>,
    ring: Arc<FrameRing>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("vigil-supervisor".into())
        .spawn(move || {
            let mut last_stats = Instant::now();
            loop {
                match events.recv_timeout(STATS_INTERVAL) {
                    Ok(PipelineEvent::CaptureEnded { frames_captured }) => {
                        log::info!("capture ended after {} frames", frames_captured);
                    }
                    Ok(PipelineEvent::SegmentFinalized(segment)) => {
                        log::info!(
                            "segment ready: {} ({} frames)",
                            segment.file_path.display(),
                            segment.frame_count
                        );
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if last_stats.elapsed() >= STATS_INTERVAL {
                    log::info!(
                        "throughput: {} pushed, {} delivered, {} dropped, {} buffered",
                        ring.pushed_count(),
                        ring.delivered_count(),
                        ring.dropped_count(),
                        ring.len()
                    );
                    last_stats = Instant::now();
                }
            }
        })
}
