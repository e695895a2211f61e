// Processing worker: the frame ring's single consumer
//
// For every popped frame, in order: rotate the segment if the frame's
// timestamp crossed an hour boundary, score it for motion, encode it into
// the active segment, and append the motion record. Per-frame sink
// failures are contained here so one bad frame never stops the pipeline;
// fatal storage errors propagate to the shutdown coordinator.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;

use crate::buffer::{FrameRing, PopResult};
use crate::frame::Frame;
use crate::metadata::{MetadataWriter, MotionRecord};
use crate::motion::MotionDetector;
use crate::pipeline::PipelineEvent;
use crate::segment::SegmentWriter;
use crate::shutdown::ShutdownCoordinator;

/// How long one pop may wait before the worker re-checks cancellation.
const POP_WAIT: Duration = Duration::from_millis(100);

/// Final accounting from the processing worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSummary {
    pub frames_processed: u64,
    pub frames_encoded: u64,
    pub encode_failures: u64,
    pub motion_frames: u64,
    pub segments_finalized: u64,
    pub records_written: u64,
    pub records_dropped: u64,
}

/// Spawn the processing worker thread.
pub fn spawn(
    ring: Arc<FrameRing>,
    writer: SegmentWriter,
    metadata: MetadataWriter,
    detector: MotionDetector,
    coordinator: ShutdownCoordinator,
    events: Sender<PipelineEvent>,
) -> std::io::Result<JoinHandle<ProcessSummary>> {
    std::thread::Builder::new()
        .name("vigil-process".into())
        .spawn(move || process_loop(ring, writer, metadata, detector, coordinator, events))
}

fn process_loop(
    ring: Arc<FrameRing>,
    mut writer: SegmentWriter,
    mut metadata: MetadataWriter,
    mut detector: MotionDetector,
    coordinator: ShutdownCoordinator,
    events: Sender<PipelineEvent>,
) -> ProcessSummary {
    let mut summary = ProcessSummary::default();
    let mut last_timestamp: Option<DateTime<Utc>> = None;

    loop {
        if coordinator.is_forced() {
            let abandoned = ring.len();
            if abandoned > 0 {
                log::warn!("forced stop: abandoning {} buffered frames", abandoned);
            }
            break;
        }

        match ring.pop(POP_WAIT) {
            PopResult::Frame(frame) => {
                last_timestamp = Some(frame.captured_at());
                handle_frame(
                    frame,
                    &mut writer,
                    &mut metadata,
                    &mut detector,
                    &coordinator,
                    &events,
                    &mut summary,
                );
            }
            PopResult::TimedOut => continue,
            PopResult::Closed => {
                // Ring closed and fully drained: nothing more will arrive.
                break;
            }
        }
    }

    // Finalize the active segment and flush metadata, even on a forced
    // stop. An unfinalized container is exactly what shutdown must avoid.
    let end_time = last_timestamp.unwrap_or_else(Utc::now);
    match writer.close(end_time) {
        Ok(Some(segment)) => {
            summary.segments_finalized += 1;
            let _ = events.send(PipelineEvent::SegmentFinalized(segment));
        }
        Ok(None) => {}
        Err(e) => log::error!("failed to finalize the last segment: {}", e),
    }
    if let Err(e) = metadata.close() {
        log::error!("failed to flush metadata on shutdown: {}", e);
    }

    summary.records_written = metadata.records_written();
    summary.records_dropped = metadata.records_dropped();
    log::info!(
        "processing stopped: {} frames processed, {} encoded, {} segments finalized",
        summary.frames_processed,
        summary.frames_encoded,
        summary.segments_finalized,
    );
    summary
}

fn handle_frame(
    frame: Frame,
    writer: &mut SegmentWriter,
    metadata: &mut MetadataWriter,
    detector: &mut MotionDetector,
    coordinator: &ShutdownCoordinator,
    events: &Sender<PipelineEvent>,
    summary: &mut ProcessSummary,
) {
    summary.frames_processed += 1;
    let timestamp = frame.captured_at();

    // Rotation happens before the frame is encoded, so every frame lands
    // wholly inside the segment active at the instant it is processed.
    if writer.needs_rotation(timestamp) {
        match writer.rotate(timestamp) {
            Ok(outcome) => {
                if let Some(segment) = outcome.finalized {
                    summary.segments_finalized += 1;
                    let _ = events.send(PipelineEvent::SegmentFinalized(segment));
                }
                if let Some(stem) = outcome.opened_stem {
                    if let Err(e) = metadata.roll_to(&stem) {
                        log::warn!(
                            "metadata file for segment {} unavailable: {}",
                            stem,
                            e
                        );
                    }
                }
            }
            Err(e) if e.is_fatal() => {
                coordinator.record_fatal("process", e.to_string());
                return;
            }
            Err(e) => {
                // Finalize failed; the writer is Closed and the next frame
                // retries with a fresh segment. This frame has no segment
                // to land in.
                log::error!(
                    "rotation failed at frame {} ({}): {}",
                    frame.sequence(),
                    timestamp.to_rfc3339(),
                    e
                );
            }
        }
    }

    let outcome = detector.analyze(&frame);
    if outcome.motion_detected {
        summary.motion_frames += 1;
        log::debug!(
            "motion at frame {} (score {:.3})",
            frame.sequence(),
            outcome.score
        );
    }

    match writer.write(&frame) {
        Ok(()) => summary.frames_encoded += 1,
        Err(e) if e.is_fatal() => {
            coordinator.record_fatal("process", e.to_string());
            return;
        }
        Err(e) => {
            summary.encode_failures += 1;
            log::warn!(
                "encode failed for frame {} ({}), skipping: {}",
                frame.sequence(),
                timestamp.to_rfc3339(),
                e
            );
        }
    }

    metadata.append(&MotionRecord {
        frame_sequence: frame.sequence(),
        timestamp,
        motion_detected: outcome.motion_detected,
        score: outcome.score,
    });
}
