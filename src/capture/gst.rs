// Live camera capture via GStreamer
//
// Builds a camera -> videoconvert -> videoscale -> appsink pipeline
// negotiated to RGB at the configured geometry, and pulls samples with a
// bounded wait so the capture worker's cancellation polling stays live.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use super::{CaptureError, CaptureResult, FrameSource, SourceFrame};
use crate::frame::BYTES_PER_PIXEL;

/// Longest single wait for a sample before reporting a transient miss.
const PULL_TIMEOUT_MS: u64 = 500;

/// Camera-backed frame source.
pub struct GstCameraSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    description: String,
    width: u32,
    height: u32,
}

impl GstCameraSource {
    /// Open the camera at `camera_index` and negotiate RGB frames at the
    /// requested geometry and rate.
    pub fn open(camera_index: u32, width: u32, height: u32, fps: f64) -> anyhow::Result<Self> {
        gst::init()?;

        let pipeline = gst::Pipeline::new();

        // Prefer an explicit v4l2 device; fall back to platform autodetect
        // when that element is unavailable (non-Linux).
        let device = format!("/dev/video{}", camera_index);
        let (source, description) = match gst::ElementFactory::make("v4l2src")
            .property("device", device.as_str())
            .build()
        {
            Ok(element) => (element, format!("v4l2 camera {}", device)),
            Err(_) => {
                let element = gst::ElementFactory::make("autovideosrc")
                    .build()
                    .map_err(|e| anyhow::anyhow!("no usable video source element: {}", e))?;
                (element, "autodetected camera".to_string())
            }
        };

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create videoconvert: {}", e))?;
        let videoscale = gst::ElementFactory::make("videoscale")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create videoscale: {}", e))?;

        let fps_n = (fps * 1000.0).round() as i32;
        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", gst::Fraction::new(fps_n, 1000))
            .build();

        let appsink = gst_app::AppSink::builder()
            .caps(&caps)
            .sync(false)
            .max_buffers(4)
            .drop(true)
            .build();

        pipeline
            .add_many([&source, &videoconvert, &videoscale, appsink.upcast_ref()])
            .map_err(|e| anyhow::anyhow!("failed to assemble capture pipeline: {}", e))?;
        gst::Element::link_many([&source, &videoconvert, &videoscale, appsink.upcast_ref()])
            .map_err(|e| anyhow::anyhow!("failed to link capture pipeline: {}", e))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| anyhow::anyhow!("camera pipeline failed to start: {:?}", e))?;

        log::info!("camera pipeline running: {}", description);
        Ok(Self {
            pipeline,
            appsink,
            description,
            width,
            height,
        })
    }
}

impl FrameSource for GstCameraSource {
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn next_frame(&mut self) -> CaptureResult<SourceFrame> {
        let sample = match self
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
        {
            Some(sample) => sample,
            None => {
                if self.appsink.is_eos() {
                    return Err(CaptureError::Exhausted("camera stream ended".into()));
                }
                return Err(CaptureError::Transient(format!(
                    "no sample within {}ms",
                    PULL_TIMEOUT_MS
                )));
            }
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::Transient("sample carried no buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::Transient("buffer not readable".into()))?;

        let expected = self.width as usize * self.height as usize * BYTES_PER_PIXEL;
        if map.len() < expected {
            return Err(CaptureError::Transient(format!(
                "short frame: {} bytes, expected {}",
                map.len(),
                expected
            )));
        }

        // Strides beyond the packed size (row padding) are dropped by
        // truncating to the packed length; RGB caps negotiated above make
        // padding rare in practice.
        Ok(SourceFrame {
            pixels: map.as_slice()[..expected].to_vec(),
            width: self.width,
            height: self.height,
        })
    }
}

impl Drop for GstCameraSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
