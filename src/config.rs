// Configuration management for Vigil

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration, constructed once at startup and passed by
/// reference into each component. No component reads ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Index of the camera device to open
    #[serde(default)]
    pub camera_index: u32,

    /// Capture width in pixels
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,

    /// Capture height in pixels
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,

    /// Target acquisition rate in frames per second
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,

    /// Capacity of the frame ring between capture and processing.
    /// When processing falls behind by more than this many frames,
    /// the oldest buffered frame is dropped.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Directory for video segment files
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,

    /// Directory for per-frame motion metadata
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,

    /// Fraction of changed pixels (0..=1) above which a frame counts
    /// as motion
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: f32,

    /// Minimum per-pixel luma delta that counts as a change
    #[serde(default = "default_noise_floor")]
    pub noise_floor: u8,

    /// JPEG quality (1-100) for the built-in MJPEG segment sink
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Refuse to open a new segment when the recordings volume has less
    /// than this many MB free. 0 disables the check.
    #[serde(default = "default_min_free_space_mb")]
    pub min_free_space_mb: u64,

    /// How long a clean shutdown may spend draining buffered frames
    /// before escalating to a forced stop
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_index: 0,
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            target_fps: default_target_fps(),
            buffer_capacity: default_buffer_capacity(),
            recordings_dir: default_recordings_dir(),
            metadata_dir: default_metadata_dir(),
            motion_threshold: default_motion_threshold(),
            noise_floor: default_noise_floor(),
            jpeg_quality: default_jpeg_quality(),
            min_free_space_mb: default_min_free_space_mb(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl Config {
    /// Load config from disk or return defaults. A missing or malformed
    /// file is logged and replaced by defaults rather than aborting.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => return config,
                Err(e) => {
                    log::warn!("failed to parse config {}: {}", path.display(), e);
                }
            },
            Err(e) => {
                log::warn!("failed to read config file {}: {}", path.display(), e);
            }
        }

        Self::default()
    }

    /// Save config to disk.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.frame_width == 0 || self.frame_height == 0 {
            anyhow::bail!(
                "frame dimensions must be non-zero (got {}x{})",
                self.frame_width,
                self.frame_height
            );
        }
        if self.target_fps <= 0.0 {
            anyhow::bail!("target_fps must be positive (got {})", self.target_fps);
        }
        if self.buffer_capacity == 0 {
            anyhow::bail!("buffer_capacity must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.motion_threshold) {
            anyhow::bail!(
                "motion_threshold must be within 0..=1 (got {})",
                self.motion_threshold
            );
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            anyhow::bail!(
                "jpeg_quality must be within 1..=100 (got {})",
                self.jpeg_quality
            );
        }
        Ok(())
    }
}

/// Default base directory for recordings and metadata
fn default_storage_base() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Vigil")
}

fn default_recordings_dir() -> PathBuf {
    default_storage_base().join("recordings")
}

fn default_metadata_dir() -> PathBuf {
    default_storage_base().join("metadata")
}

fn default_frame_width() -> u32 {
    640
}

fn default_frame_height() -> u32 {
    480
}

fn default_target_fps() -> f64 {
    20.0
}

fn default_buffer_capacity() -> usize {
    128
}

fn default_motion_threshold() -> f32 {
    0.05
}

fn default_noise_floor() -> u8 {
    25
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_min_free_space_mb() -> u64 {
    512
}

fn default_drain_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.target_fps = 15.0;
        config.motion_threshold = 0.1;
        config.save(&path).unwrap();

        let loaded = Config::load_or_default(Some(&path));
        assert_eq!(loaded.target_fps, 15.0);
        assert_eq!(loaded.motion_threshold, 0.1);
        assert_eq!(loaded.buffer_capacity, config.buffer_capacity);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "target_fps = 10.0\nnoise_floor = 30\n").unwrap();

        let loaded = Config::load_or_default(Some(&path));
        assert_eq!(loaded.target_fps, 10.0);
        assert_eq!(loaded.noise_floor, 30);
        assert_eq!(loaded.frame_width, 640);
    }

    #[test]
    fn malformed_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();

        let loaded = Config::load_or_default(Some(&path));
        assert_eq!(loaded.frame_width, Config::default().frame_width);
    }

    #[test]
    fn rejects_impossible_settings() {
        let mut config = Config::default();
        config.frame_width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.motion_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.buffer_capacity = 0;
        assert!(config.validate().is_err());
    }
}
