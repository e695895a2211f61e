// Frame value type shared across the capture pipeline

use chrono::{DateTime, Utc};

/// A single captured video frame.
///
/// Frames are immutable once produced. Ownership moves from the capture
/// stage into the frame ring and from there to the processing stage; the
/// ring is single-producer single-consumer, so no frame is ever aliased
/// between workers.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Interleaved RGB24 pixel data, `width * height * 3` bytes.
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    /// Wall-clock time the frame was acquired from the source.
    captured_at: DateTime<Utc>,
    /// Strictly increasing per-run sequence number, starting at 1.
    sequence: u64,
}

/// Bytes per RGB24 pixel.
pub const BYTES_PER_PIXEL: usize = 3;

impl Frame {
    /// Build a frame from raw RGB24 data.
    ///
    /// Returns `None` if the pixel buffer length does not match the
    /// dimensions; a malformed frame must never enter the pipeline.
    pub fn from_rgb(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: DateTime<Utc>,
        sequence: u64,
    ) -> Option<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected || width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            pixels,
            width,
            height,
            captured_at,
            sequence,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Approximate luma (BT.601 integer weights) for every pixel.
    /// Row-major, `width * height` bytes.
    pub fn luma_plane(&self) -> Vec<u8> {
        self.pixels
            .chunks_exact(BYTES_PER_PIXEL)
            .map(|px| {
                let r = px[0] as u32;
                let g = px[1] as u32;
                let b = px[2] as u32;
                ((77 * r + 150 * g + 29 * b) >> 8) as u8
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_pixel_length() {
        let now = Utc::now();
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2, now, 1).is_none());
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2, now, 1).is_some());
    }

    #[test]
    fn rejects_zero_dimensions() {
        let now = Utc::now();
        assert!(Frame::from_rgb(Vec::new(), 0, 4, now, 1).is_none());
        assert!(Frame::from_rgb(Vec::new(), 4, 0, now, 1).is_none());
    }

    #[test]
    fn luma_plane_has_one_byte_per_pixel() {
        let now = Utc::now();
        let frame = Frame::from_rgb(vec![255u8; 2 * 3 * 3], 2, 3, now, 7).unwrap();
        let luma = frame.luma_plane();
        assert_eq!(luma.len(), 6);
        // White pixels map to the top of the luma range.
        assert!(luma.iter().all(|&y| y > 250));
    }
}
