// VP8-in-Matroska segment sink via GStreamer
//
// One encoding pipeline per segment: appsrc -> videoconvert -> vp8enc ->
// matroskamux -> filesink. Finalize pushes EOS and waits for the muxer to
// write its trailer before the file handle is released, so a finalized
// segment is always a complete, readable container.

use std::path::Path;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use super::{SegmentEncoder, VideoParams};
use crate::frame::Frame;
use crate::segment::{SegmentError, SegmentResult};

/// How long finalize waits for the muxer to flush its trailer.
const EOS_TIMEOUT_SECS: u64 = 10;

struct ActivePipeline {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    frame_duration_ns: u64,
    frames_pushed: u64,
}

/// GStreamer-backed [`SegmentEncoder`].
pub struct GstSegmentEncoder {
    active: Option<ActivePipeline>,
}

impl GstSegmentEncoder {
    pub fn new() -> Self {
        Self { active: None }
    }

    fn build_pipeline(path: &Path, params: &VideoParams) -> SegmentResult<ActivePipeline> {
        gst::init().map_err(|e| storage_error(format!("gstreamer init failed: {}", e)))?;

        let pipeline = gst::Pipeline::new();

        let fps_n = (params.fps * 1000.0).round() as i32;
        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .field("width", params.width as i32)
            .field("height", params.height as i32)
            .field("framerate", gst::Fraction::new(fps_n, 1000))
            .build();

        let appsrc = gst_app::AppSrc::builder()
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| storage_error(format!("failed to create videoconvert: {}", e)))?;

        // Realtime deadline: the encoder must keep up with capture rather
        // than chase quality.
        let encoder = gst::ElementFactory::make("vp8enc")
            .property("deadline", 1i64)
            .build()
            .map_err(|e| storage_error(format!("failed to create vp8enc: {}", e)))?;

        let muxer = gst::ElementFactory::make("matroskamux")
            .build()
            .map_err(|e| storage_error(format!("failed to create matroskamux: {}", e)))?;

        let filesink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .property("sync", false)
            .build()
            .map_err(|e| storage_error(format!("failed to create filesink: {}", e)))?;

        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &videoconvert,
                &encoder,
                &muxer,
                &filesink,
            ])
            .map_err(|e| storage_error(format!("failed to assemble encode pipeline: {}", e)))?;
        gst::Element::link_many([
            appsrc.upcast_ref(),
            &videoconvert,
            &encoder,
            &muxer,
            &filesink,
        ])
        .map_err(|e| storage_error(format!("failed to link encode pipeline: {}", e)))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| storage_error(format!("encode pipeline failed to start: {:?}", e)))?;

        let frame_duration_ns = (1_000_000_000.0 / params.fps.max(0.001)) as u64;
        Ok(ActivePipeline {
            pipeline,
            appsrc,
            frame_duration_ns,
            frames_pushed: 0,
        })
    }
}

impl Default for GstSegmentEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentEncoder for GstSegmentEncoder {
    fn file_extension(&self) -> &'static str {
        "mkv"
    }

    fn open(&mut self, path: &Path, params: &VideoParams) -> SegmentResult<()> {
        if self.active.is_some() {
            return Err(SegmentError::Encode(
                "open while a segment pipeline is still active".into(),
            ));
        }
        self.active = Some(Self::build_pipeline(path, params)?);
        Ok(())
    }

    fn encode(&mut self, frame: &Frame) -> SegmentResult<()> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| SegmentError::Encode("encode on a closed sink".into()))?;

        let pts = active.frames_pushed * active.frame_duration_ns;
        let mut buffer = gst::Buffer::from_slice(frame.pixels().to_vec());
        {
            let buffer_ref = buffer.get_mut().unwrap();
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(active.frame_duration_ns));
        }

        active
            .appsrc
            .push_buffer(buffer)
            .map_err(|e| SegmentError::Encode(format!("failed to push frame: {:?}", e)))?;
        active.frames_pushed += 1;
        Ok(())
    }

    fn finalize(&mut self) -> SegmentResult<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };

        if let Err(e) = active.appsrc.end_of_stream() {
            let _ = active.pipeline.set_state(gst::State::Null);
            return Err(SegmentError::Finalize(format!("EOS send failed: {:?}", e)));
        }

        // Wait for the muxer to write its trailer before tearing down.
        let mut got_eos = false;
        let mut bus_error = None;
        if let Some(bus) = active.pipeline.bus() {
            for msg in bus.iter_timed(gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS)) {
                match msg.view() {
                    gst::MessageView::Eos(..) => {
                        got_eos = true;
                        break;
                    }
                    gst::MessageView::Error(err) => {
                        bus_error = Some(format!("{} ({:?})", err.error(), err.debug()));
                        break;
                    }
                    _ => {}
                }
            }
        }

        let _ = active.pipeline.set_state(gst::State::Null);

        if let Some(error) = bus_error {
            return Err(SegmentError::Finalize(format!(
                "pipeline error during finalize: {}",
                error
            )));
        }
        if !got_eos {
            return Err(SegmentError::Finalize(format!(
                "no EOS within {}s, container trailer may be incomplete",
                EOS_TIMEOUT_SECS
            )));
        }
        Ok(())
    }
}

impl Drop for GstSegmentEncoder {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.appsrc.end_of_stream();
            let _ = active.pipeline.set_state(gst::State::Null);
        }
    }
}

fn storage_error(message: String) -> SegmentError {
    SegmentError::Storage(std::io::Error::other(message))
}
