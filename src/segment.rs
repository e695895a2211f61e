// Segment lifecycle and hourly rotation
//
// Exactly one segment is open at any instant. Rotation is driven by the
// timestamps of frames flowing through the pipeline, never by wall-clock
// timers, so the decision is deterministic for a given frame stream. The
// previous segment is fully finalized before the next one opens; a failed
// finalize still lands the writer in Closed so the next frame can start a
// fresh segment instead of halting capture.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Timelike, Utc};

use crate::encode::{SegmentEncoder, VideoParams};
use crate::frame::Frame;

/// Error type for segment writing and rotation.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// Single-frame encode failure. The frame is skipped, the segment
    /// continues.
    #[error("encode error: {0}")]
    Encode(String),

    /// The active segment could not be finalized cleanly. A new segment
    /// is attempted on the next frame.
    #[error("segment finalize error: {0}")]
    Finalize(String),

    /// The storage volume is unusable (directory unwritable, disk full).
    /// Fatal to the pipeline.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Free space on the recordings volume fell below the configured floor.
    /// Fatal to the pipeline.
    #[error("free space exhausted: {available_mb} MB available, {required_mb} MB required")]
    DiskFull {
        available_mb: u64,
        required_mb: u64,
    },
}

impl SegmentError {
    /// Whether this error must halt the whole pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SegmentError::Storage(_) | SegmentError::DiskFull { .. })
    }
}

pub type SegmentResult<T> = std::result::Result<T, SegmentError>;

/// One finalized output segment.
#[derive(Debug, Clone)]
pub struct Segment {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub file_path: PathBuf,
    pub frame_count: u64,
}

/// Rotation manager state machine: Closed -> Open -> Closing -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Closed,
    Open,
    Closing,
}

struct ActiveSegment {
    start_time: DateTime<Utc>,
    /// Filename stem derived from `start_time`, shared with the metadata
    /// writer so video and metadata files pair up.
    stem: String,
    path: PathBuf,
    frame_count: u64,
}

/// What a rotation step did: which segment (if any) was finalized, and the
/// stem of the segment now open.
#[derive(Debug)]
pub struct RotationOutcome {
    pub finalized: Option<Segment>,
    pub opened_stem: Option<String>,
}

/// Owns the encoder sink and the lifecycle of the active segment.
pub struct SegmentWriter {
    encoder: Box<dyn SegmentEncoder>,
    recordings_dir: PathBuf,
    params: VideoParams,
    /// Free-space floor in MB checked before each open; 0 disables the check.
    min_free_space_mb: u64,
    state: WriterState,
    active: Option<ActiveSegment>,
    segments_finalized: u64,
}

impl SegmentWriter {
    pub fn new(
        encoder: Box<dyn SegmentEncoder>,
        recordings_dir: PathBuf,
        params: VideoParams,
        min_free_space_mb: u64,
    ) -> Self {
        Self {
            encoder,
            recordings_dir,
            params,
            min_free_space_mb,
            state: WriterState::Closed,
            active: None,
            segments_finalized: 0,
        }
    }

    /// Whether processing `timestamp` requires a rotation first: either no
    /// segment is open yet, or the frame's calendar hour differs from the
    /// active segment's hour.
    pub fn needs_rotation(&self, timestamp: DateTime<Utc>) -> bool {
        match &self.active {
            None => true,
            Some(active) => !same_hour(active.start_time, timestamp),
        }
    }

    /// Finalize the active segment (if any) and open a new one starting at
    /// `timestamp`. The new segment only begins accepting frames once the
    /// previous one is fully finalized.
    ///
    /// On a finalize failure the writer still reaches Closed and does NOT
    /// open a replacement; the error is returned and the next call retries
    /// with a fresh segment. Open failures are fatal (storage taxonomy).
    pub fn rotate(&mut self, timestamp: DateTime<Utc>) -> SegmentResult<RotationOutcome> {
        let finalized = match self.finalize_active(timestamp) {
            Ok(segment) => segment,
            Err(e) => return Err(e),
        };

        let stem = self.open_segment(timestamp)?;
        Ok(RotationOutcome {
            finalized,
            opened_stem: Some(stem),
        })
    }

    /// Append one frame to the active segment. Callers must have rotated
    /// first; encoding while no segment is open is a per-frame error, not
    /// a crash.
    pub fn write(&mut self, frame: &Frame) -> SegmentResult<()> {
        if self.state != WriterState::Open {
            return Err(SegmentError::Encode(
                "no open segment to write into".into(),
            ));
        }
        self.encoder.encode(frame)?;
        if let Some(active) = self.active.as_mut() {
            active.frame_count += 1;
        }
        Ok(())
    }

    /// Finalize the active segment for shutdown. Idempotent.
    pub fn close(&mut self, end_time: DateTime<Utc>) -> SegmentResult<Option<Segment>> {
        self.finalize_active(end_time)
    }

    /// Stem of the currently open segment, if one is open.
    pub fn active_stem(&self) -> Option<&str> {
        match self.state {
            WriterState::Open => self.active.as_ref().map(|a| a.stem.as_str()),
            _ => None,
        }
    }

    pub fn segments_finalized(&self) -> u64 {
        self.segments_finalized
    }

    fn finalize_active(&mut self, end_time: DateTime<Utc>) -> SegmentResult<Option<Segment>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        self.state = WriterState::Closing;

        // Best-effort cleanup: whatever finalize does, the writer ends up
        // Closed and the active slot stays empty.
        let result = self.encoder.finalize();
        self.state = WriterState::Closed;

        match result {
            Ok(()) => {
                self.segments_finalized += 1;
                let segment = Segment {
                    start_time: active.start_time,
                    end_time,
                    file_path: active.path,
                    frame_count: active.frame_count,
                };
                log::info!(
                    "finalized segment {} ({} frames, {} - {})",
                    segment.file_path.display(),
                    segment.frame_count,
                    segment.start_time.format("%H:%M:%S"),
                    segment.end_time.format("%H:%M:%S"),
                );
                Ok(Some(segment))
            }
            Err(e) => Err(SegmentError::Finalize(format!(
                "segment {} left unfinalized: {}",
                active.path.display(),
                e
            ))),
        }
    }

    fn open_segment(&mut self, start_time: DateTime<Utc>) -> SegmentResult<String> {
        debug_assert_eq!(self.state, WriterState::Closed);

        if self.min_free_space_mb > 0 {
            check_free_space(&self.recordings_dir, self.min_free_space_mb)?;
        }

        let stem = segment_stem(start_time);
        let path = self
            .recordings_dir
            .join(format!("{}.{}", stem, self.encoder.file_extension()));

        self.encoder.open(&path, &self.params)?;
        log::info!("opened segment {}", path.display());

        self.state = WriterState::Open;
        self.active = Some(ActiveSegment {
            start_time,
            stem: stem.clone(),
            path,
            frame_count: 0,
        });
        Ok(stem)
    }
}

/// Filename stem for a segment starting at `start_time`.
pub fn segment_stem(start_time: DateTime<Utc>) -> String {
    start_time.format("%Y%m%d_%H%M%S").to_string()
}

fn same_hour(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive() && a.hour() == b.hour()
}

/// Fail when the volume holding `dir` has less than `min_free_mb` available.
///
/// The volume is matched by the longest mount point that prefixes the
/// directory path; an unmatched path skips the check rather than guessing.
fn check_free_space(dir: &Path, min_free_mb: u64) -> SegmentResult<()> {
    let target = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let disks = sysinfo::Disks::new_with_refreshed_list();

    let best = disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());

    if let Some(disk) = best {
        let available_mb = disk.available_space() / (1024 * 1024);
        if available_mb < min_free_mb {
            return Err(SegmentError::DiskFull {
                available_mb,
                required_mb: min_free_mb,
            });
        }
    } else {
        log::debug!(
            "no disk matches {}, skipping free-space check",
            target.display()
        );
    }
    Ok(())
}
