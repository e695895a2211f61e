// Frame-to-frame motion scoring
//
// The detector compares the luma plane of each frame against the previous
// accepted frame: a pixel counts as changed when its luma delta exceeds a
// per-pixel noise floor, and the score is the fraction of changed pixels.
// The computation is deterministic and side-effect-free; the only state
// retained is the previous luma plane needed for the next comparison.

use ndarray::{Array2, ArrayView2};

use crate::frame::Frame;

/// Result of scoring one frame against its predecessor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionOutcome {
    pub motion_detected: bool,
    /// Fraction of pixels whose luma delta exceeded the noise floor, in 0..=1.
    pub score: f32,
}

impl MotionOutcome {
    fn still() -> Self {
        Self {
            motion_detected: false,
            score: 0.0,
        }
    }
}

/// Scores consecutive frames for motion.
pub struct MotionDetector {
    /// Score above this fraction flags motion.
    threshold: f32,
    /// Minimum per-pixel luma delta that counts as a change.
    noise_floor: u8,
    previous: Option<Array2<u8>>,
}

impl MotionDetector {
    pub fn new(threshold: f32, noise_floor: u8) -> Self {
        Self {
            threshold,
            noise_floor,
            previous: None,
        }
    }

    /// Score `frame` against the previously analyzed frame.
    ///
    /// The first frame of a run has nothing to compare against and always
    /// yields no motion with a zero score. A dimension change (source
    /// renegotiated its caps) resets the comparison the same way.
    pub fn analyze(&mut self, frame: &Frame) -> MotionOutcome {
        let shape = (frame.height() as usize, frame.width() as usize);
        let luma = frame.luma_plane();
        let current = Array2::from_shape_vec(shape, luma)
            .expect("luma plane length matches frame dimensions");

        let outcome = match &self.previous {
            Some(previous) if previous.dim() == current.dim() => {
                let score = changed_fraction(previous.view(), current.view(), self.noise_floor);
                MotionOutcome {
                    motion_detected: score > self.threshold,
                    score,
                }
            }
            _ => MotionOutcome::still(),
        };

        self.previous = Some(current);
        outcome
    }
}

/// Fraction of pixels whose absolute luma delta exceeds `noise_floor`.
fn changed_fraction(previous: ArrayView2<u8>, current: ArrayView2<u8>, noise_floor: u8) -> f32 {
    let total = current.len();
    if total == 0 {
        return 0.0;
    }
    let changed = ndarray::Zip::from(&previous)
        .and(&current)
        .fold(0usize, |acc, &p, &c| {
            let delta = (p as i16 - c as i16).unsigned_abs();
            acc + (delta > noise_floor as u16) as usize
        });
    changed as f32 / total as f32
}
