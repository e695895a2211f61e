// End-to-end pipeline tests: synthetic source through the MJPEG sink

use std::path::Path;
use std::time::Duration;

use vigil::capture::{CaptureError, CaptureResult, FrameSource, SourceFrame};
use vigil::{pipeline, Config, MjpegEncoder, MotionRecord, SyntheticSource};

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.frame_width = 32;
    config.frame_height = 24;
    config.target_fps = 200.0;
    config.buffer_capacity = 64;
    config.recordings_dir = root.join("recordings");
    config.metadata_dir = root.join("metadata");
    config.min_free_space_mb = 0;
    config.drain_timeout_secs = 10;
    config
}

fn files_with_extension(dir: &Path, extension: &str) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == extension).unwrap_or(false))
        .collect();
    files.sort();
    files
}

#[test]
fn clean_shutdown_drains_everything_and_finalizes_the_segment() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let source = Box::new(SyntheticSource::new(config.frame_width, config.frame_height));
    let encoder = Box::new(MjpegEncoder::new(config.jpeg_quality));
    let handle = pipeline::launch(&config, source, encoder).unwrap();

    std::thread::sleep(Duration::from_millis(400));
    handle.shutdown();
    let report = handle.wait();

    assert!(report.is_clean(), "unexpected fatal: {:?}", report.fatal);
    let stats = report.stats;
    assert!(stats.frames_captured > 0);

    // Every frame that entered the ring was either delivered or dropped,
    // and every delivered frame was processed and encoded.
    assert_eq!(
        stats.frames_delivered + stats.frames_dropped,
        stats.frames_captured
    );
    assert_eq!(stats.frames_processed, stats.frames_delivered);
    assert_eq!(stats.frames_encoded, stats.frames_processed);
    assert_eq!(stats.encode_failures, 0);

    // The active segment was finalized and left a non-empty file behind.
    let segments = files_with_extension(&config.recordings_dir, "mjpeg");
    assert_eq!(segments.len() as u64, stats.segments_finalized);
    assert!(!segments.is_empty());
    for segment in &segments {
        assert!(std::fs::metadata(segment).unwrap().len() > 0);
    }

    // Metadata pairs with the segment stems and preserves frame order.
    let metadata_files = files_with_extension(&config.metadata_dir, "jsonl");
    assert_eq!(metadata_files.len(), segments.len());
    for (segment, metadata) in segments.iter().zip(&metadata_files) {
        assert_eq!(segment.file_stem(), metadata.file_stem());
    }

    let mut total_records = 0u64;
    for file in &metadata_files {
        let contents = std::fs::read_to_string(file).unwrap();
        let mut last_sequence = 0u64;
        for line in contents.lines() {
            let record: MotionRecord = serde_json::from_str(line).unwrap();
            assert!(
                record.frame_sequence > last_sequence,
                "metadata out of order in {}",
                file.display()
            );
            last_sequence = record.frame_sequence;
            total_records += 1;
        }
    }
    assert_eq!(total_records, stats.records_written);
    assert_eq!(
        stats.records_written + stats.records_dropped,
        stats.frames_processed
    );
}

/// Source that delivers a fixed number of frames and then ends.
struct FiniteSource {
    inner: SyntheticSource,
    remaining: u32,
}

impl FrameSource for FiniteSource {
    fn describe(&self) -> String {
        "finite synthetic source".into()
    }

    fn next_frame(&mut self) -> CaptureResult<SourceFrame> {
        if self.remaining == 0 {
            return Err(CaptureError::Exhausted("end of test stream".into()));
        }
        self.remaining -= 1;
        self.inner.next_frame()
    }
}

#[test]
fn source_exhaustion_drains_buffered_frames_and_reports_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.target_fps = 500.0;

    let source = Box::new(FiniteSource {
        inner: SyntheticSource::new(config.frame_width, config.frame_height),
        remaining: 25,
    });
    let encoder = Box::new(MjpegEncoder::new(config.jpeg_quality));
    let handle = pipeline::launch(&config, source, encoder).unwrap();

    // No explicit shutdown: the exhausted source must end the pipeline.
    let report = handle.wait();

    assert!(report.fatal.is_some());
    assert!(report.fatal.as_ref().unwrap().contains("exhausted"));

    // The frames captured before exhaustion were still drained, encoded,
    // and finalized into a readable segment.
    let stats = report.stats;
    assert_eq!(stats.frames_captured, 25);
    assert_eq!(stats.frames_encoded, stats.frames_delivered);
    assert!(stats.segments_finalized >= 1);
    let segments = files_with_extension(&config.recordings_dir, "mjpeg");
    assert!(!segments.is_empty());
    for segment in &segments {
        assert!(std::fs::metadata(segment).unwrap().len() > 0);
    }
}

#[test]
fn validation_rejects_a_zero_capacity_ring_before_launch() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.buffer_capacity = 0;
    assert!(config.validate().is_err());
}
