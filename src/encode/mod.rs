//! Segment encoder sinks
//!
//! A `SegmentEncoder` turns raw frames into the byte stream of one output
//! segment. The rotation manager owns exactly one sink and drives it through
//! open/encode/finalize cycles, one cycle per segment. The default sink
//! appends JPEG-compressed frames to an MJPEG elementary stream: every
//! frame is self-contained, so an interrupted file is still readable up to
//! the last complete frame. The `gstreamer` feature adds a VP8-in-Matroska
//! sink built on the same GStreamer stack used for live capture.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;

#[cfg(feature = "gstreamer")]
pub mod gst;

use crate::frame::Frame;
use crate::segment::{SegmentError, SegmentResult};

/// Stream parameters fixed for the lifetime of the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// A sink that writes one segment at a time.
///
/// Contract: `open` must be balanced by `finalize` before the next `open`;
/// `encode` is only valid between the two. `finalize` must leave a
/// self-contained, readable file behind; flushing any buffered encoder
/// state is the sink's job, not the caller's.
pub trait SegmentEncoder: Send {
    /// File extension (without the dot) for segments this sink produces.
    fn file_extension(&self) -> &'static str;

    /// Start a new segment at `path`.
    fn open(&mut self, path: &Path, params: &VideoParams) -> SegmentResult<()>;

    /// Append one frame to the active segment.
    fn encode(&mut self, frame: &Frame) -> SegmentResult<()>;

    /// Flush and close the active segment.
    fn finalize(&mut self) -> SegmentResult<()>;
}

/// MJPEG elementary-stream sink: one JPEG per frame, concatenated.
pub struct MjpegEncoder {
    quality: u8,
    writer: Option<BufWriter<File>>,
}

impl MjpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            writer: None,
        }
    }
}

impl SegmentEncoder for MjpegEncoder {
    fn file_extension(&self) -> &'static str {
        "mjpeg"
    }

    fn open(&mut self, path: &Path, _params: &VideoParams) -> SegmentResult<()> {
        // A failure to create the output file means the recordings
        // directory is unusable, not a bad frame.
        let file = File::create(path).map_err(SegmentError::Storage)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn encode(&mut self, frame: &Frame) -> SegmentResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SegmentError::Encode("encode on a closed sink".into()))?;
        JpegEncoder::new_with_quality(writer, self.quality)
            .encode(
                frame.pixels(),
                frame.width(),
                frame.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| SegmentError::Encode(format!("jpeg encode failed: {}", e)))
    }

    fn finalize(&mut self) -> SegmentResult<()> {
        let Some(mut writer) = self.writer.take() else {
            // Finalizing an already-closed sink is a no-op.
            return Ok(());
        };
        writer
            .flush()
            .map_err(|e| SegmentError::Finalize(format!("flush failed: {}", e)))?;
        writer
            .into_inner()
            .map_err(|e| SegmentError::Finalize(format!("flush failed: {}", e)))?
            .sync_all()
            .map_err(|e| SegmentError::Finalize(format!("fsync failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(sequence: u64) -> Frame {
        let mut pixels = vec![0u8; 16 * 16 * 3];
        for (i, px) in pixels.iter_mut().enumerate() {
            *px = ((i as u64 + sequence) % 256) as u8;
        }
        Frame::from_rgb(pixels, 16, 16, Utc::now(), sequence).unwrap()
    }

    fn params() -> VideoParams {
        VideoParams {
            width: 16,
            height: 16,
            fps: 20.0,
        }
    }

    #[test]
    fn writes_one_jpeg_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.mjpeg");

        let mut sink = MjpegEncoder::new(85);
        sink.open(&path, &params()).unwrap();
        sink.encode(&frame(1)).unwrap();
        sink.encode(&frame(2)).unwrap();
        sink.finalize().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // Two JPEG SOI markers, and the stream ends on an EOI marker.
        let soi_count = bytes.windows(2).filter(|w| w == &[0xFF, 0xD8]).count();
        assert_eq!(soi_count, 2);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn encode_without_open_is_an_encode_error() {
        let mut sink = MjpegEncoder::new(85);
        let err = sink.encode(&frame(1)).unwrap_err();
        assert!(matches!(err, SegmentError::Encode(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn open_into_a_missing_directory_is_fatal() {
        let mut sink = MjpegEncoder::new(85);
        let err = sink
            .open(Path::new("/nonexistent-dir/out.mjpeg"), &params())
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn finalize_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.mjpeg");
        let mut sink = MjpegEncoder::new(85);
        sink.open(&path, &params()).unwrap();
        sink.encode(&frame(1)).unwrap();
        sink.finalize().unwrap();
        sink.finalize().unwrap();
    }
}
