// Vigil - Motion-Aware Webcam Surveillance Recorder
// Main library entry point

pub mod buffer;
pub mod capture;
pub mod config;
pub mod encode;
pub mod frame;
pub mod metadata;
pub mod motion;
pub mod pipeline;
pub mod process;
pub mod segment;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod testutil;

pub use buffer::{FrameRing, PopResult, PushOutcome};
pub use capture::{CaptureError, FrameSource, SourceFrame, SyntheticSource};
pub use config::Config;
pub use encode::{MjpegEncoder, SegmentEncoder, VideoParams};
pub use frame::Frame;
pub use metadata::{MetadataWriter, MotionRecord};
pub use motion::{MotionDetector, MotionOutcome};
pub use pipeline::{PipelineHandle, PipelineReport, PipelineStats};
pub use segment::{Segment, SegmentError, SegmentWriter};
pub use shutdown::{PipelineState, ShutdownCoordinator};
