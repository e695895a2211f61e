// Shared helpers for unit tests

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::encode::{SegmentEncoder, VideoParams};
use crate::frame::Frame;
use crate::segment::{SegmentError, SegmentResult};

/// Parse an RFC 3339 timestamp literal.
pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

#[derive(Default)]
struct MockSinkState {
    calls: Vec<&'static str>,
    opened_paths: Vec<String>,
    encoded_sequences: Vec<u64>,
    fail_next_finalize: bool,
    fail_next_encode: bool,
    fail_next_open_fatal: bool,
}

/// Shared call log for a [`MockEncoder`], inspectable after the encoder
/// has been boxed and moved into a writer.
#[derive(Clone, Default)]
pub struct MockSinkLog {
    state: Arc<Mutex<MockSinkState>>,
}

impl MockSinkLog {
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn opened_paths(&self) -> Vec<String> {
        self.state.lock().opened_paths.clone()
    }

    pub fn encoded_sequences(&self) -> Vec<u64> {
        self.state.lock().encoded_sequences.clone()
    }

    pub fn encoded_count(&self) -> usize {
        self.state.lock().encoded_sequences.len()
    }

    pub fn fail_next_finalize(&self) {
        self.state.lock().fail_next_finalize = true;
    }

    pub fn fail_next_encode(&self) {
        self.state.lock().fail_next_encode = true;
    }

    pub fn fail_next_open_fatal(&self) {
        self.state.lock().fail_next_open_fatal = true;
    }
}

/// In-memory [`SegmentEncoder`] that records calls and injects failures.
pub struct MockEncoder {
    log: MockSinkLog,
    open: bool,
}

impl MockEncoder {
    pub fn new(log: MockSinkLog) -> Self {
        Self { log, open: false }
    }
}

impl SegmentEncoder for MockEncoder {
    fn file_extension(&self) -> &'static str {
        "mock"
    }

    fn open(&mut self, path: &Path, _params: &VideoParams) -> SegmentResult<()> {
        let mut state = self.log.state.lock();
        state.calls.push("open");
        if state.fail_next_open_fatal {
            state.fail_next_open_fatal = false;
            return Err(SegmentError::Storage(std::io::Error::other(
                "injected open failure",
            )));
        }
        state.opened_paths.push(path.display().to_string());
        drop(state);
        self.open = true;
        Ok(())
    }

    fn encode(&mut self, frame: &Frame) -> SegmentResult<()> {
        let mut state = self.log.state.lock();
        state.calls.push("encode");
        if !self.open {
            return Err(SegmentError::Encode("sink not open".into()));
        }
        if state.fail_next_encode {
            state.fail_next_encode = false;
            return Err(SegmentError::Encode("injected encode failure".into()));
        }
        state.encoded_sequences.push(frame.sequence());
        Ok(())
    }

    fn finalize(&mut self) -> SegmentResult<()> {
        let mut state = self.log.state.lock();
        state.calls.push("finalize");
        self.open = false;
        if state.fail_next_finalize {
            state.fail_next_finalize = false;
            return Err(SegmentError::Finalize("injected finalize failure".into()));
        }
        Ok(())
    }
}
