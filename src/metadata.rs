// Per-frame motion metadata persistence
//
// One JSON Lines file per segment, named with the same stem as the video
// file it describes. Records are appended in arrival order as they are
// produced; a failed append gets exactly one immediate retry and is then
// dropped, since losing a metadata record must never threaten video
// continuity.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error type for metadata persistence.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata write error: {0}")]
    Write(#[from] std::io::Error),

    #[error("metadata encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// One motion record per processed frame. Append-only; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionRecord {
    pub frame_sequence: u64,
    /// ISO-8601 timestamp of the frame this record describes.
    pub timestamp: DateTime<Utc>,
    pub motion_detected: bool,
    pub score: f32,
}

/// Appends motion records to the hour file matching the active segment.
pub struct MetadataWriter {
    metadata_dir: PathBuf,
    writer: Option<BufWriter<File>>,
    active_path: Option<PathBuf>,
    records_written: u64,
    records_dropped: u64,
}

impl MetadataWriter {
    pub fn new(metadata_dir: PathBuf) -> Self {
        Self {
            metadata_dir,
            writer: None,
            active_path: None,
            records_written: 0,
            records_dropped: 0,
        }
    }

    /// Switch to the metadata file for a new segment stem, flushing and
    /// closing the previous file first. Called by the processing stage in
    /// lockstep with segment rotation.
    ///
    /// An open failure leaves the writer without a file: records are
    /// dropped (and counted) until the next rotation, because metadata
    /// loss is non-fatal to the recording itself.
    pub fn roll_to(&mut self, stem: &str) -> MetadataResult<()> {
        self.close()?;
        let path = self.metadata_dir.join(format!("{}.jsonl", stem));
        let file = File::create(&path)?;
        log::info!("opened metadata file {}", path.display());
        self.writer = Some(BufWriter::new(file));
        self.active_path = Some(path);
        Ok(())
    }

    /// Append one record, preserving arrival order. Fire-and-forget with
    /// one bounded retry: on a second failure the record is dropped and
    /// the failure logged with enough context to reconstruct the loss.
    pub fn append(&mut self, record: &MotionRecord) {
        let Some(writer) = self.writer.as_mut() else {
            self.records_dropped += 1;
            log::warn!(
                "no metadata file open, dropping record for frame {}",
                record.frame_sequence
            );
            return;
        };

        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                self.records_dropped += 1;
                log::error!(
                    "failed to encode metadata record for frame {}: {}",
                    record.frame_sequence,
                    e
                );
                return;
            }
        };

        let mut attempt = || -> std::io::Result<()> {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")
        };

        if let Err(first) = attempt() {
            log::warn!(
                "metadata write failed for frame {} ({}), retrying once",
                record.frame_sequence,
                first
            );
            if let Err(second) = attempt() {
                self.records_dropped += 1;
                log::error!(
                    "metadata record for frame {} at {} dropped: {}",
                    record.frame_sequence,
                    record.timestamp.to_rfc3339(),
                    second
                );
                return;
            }
        }
        self.records_written += 1;
    }

    /// Flush and close the active file. Idempotent; used at rotation and
    /// shutdown.
    pub fn close(&mut self) -> MetadataResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            if let Some(path) = self.active_path.take() {
                log::debug!("closed metadata file {}", path.display());
            }
        }
        self.active_path = None;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped
    }
}
