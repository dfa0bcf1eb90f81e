//! Configuration management for the screen recorder

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::AudioFormat;
use crate::capture::Region;
use crate::session::ControllerOptions;
use crate::video::{Container, FrameRate};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// What to record and how
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Microphone capture
    #[serde(default)]
    pub audio: AudioConfig,

    /// Output files and session limits
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Free space warnings
    #[serde(default)]
    pub disk: DiskConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// One of 30, 60, 100, 120
    #[serde(default)]
    pub fps: FrameRate,

    /// mp4, avi or mkv
    #[serde(default)]
    pub container: Container,

    /// Monitor index; the primary monitor when unset
    #[serde(default)]
    pub monitor: Option<usize>,

    /// Explicit region; overrides `monitor`
    #[serde(default)]
    pub region: Option<Region>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Record the microphone alongside the screen
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Input device name; the system default when unset
    #[serde(default)]
    pub device: Option<String>,

    #[serde(default = "default_channels")]
    pub channels: u16,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Frames per captured chunk
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Where video and audio files are written
    #[serde(default)]
    pub output_directory: Option<PathBuf>,

    /// Stop automatically after this many seconds
    #[serde(default)]
    pub max_duration_secs: Option<u64>,

    /// How long stop waits for each capture loop
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: u64,

    /// Encoder used for writing and merging
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    #[serde(default = "default_disk_poll_interval")]
    pub poll_interval_secs: u64,

    /// Warn when less recording time than this remains
    #[serde(default = "default_urgent_threshold")]
    pub urgent_threshold_secs: u64,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_channels() -> u16 {
    AudioFormat::default().channels
}

fn default_sample_rate() -> u32 {
    AudioFormat::default().sample_rate
}

fn default_chunk_frames() -> usize {
    AudioFormat::default().chunk_frames
}

fn default_join_timeout() -> u64 {
    10
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_disk_poll_interval() -> u64 {
    5
}

fn default_urgent_threshold() -> u64 {
    300 // five minutes
}

fn default_output_directory() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.video_dir().map(|d| d.join("screen-recorder")))
        .unwrap_or_else(|| std::env::temp_dir().join("screen-recorder"))
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: FrameRate::default(),
            container: Container::default(),
            monitor: None,
            region: None,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: None,
            channels: default_channels(),
            sample_rate: default_sample_rate(),
            chunk_frames: default_chunk_frames(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_directory: None,
            max_duration_secs: None,
            join_timeout_secs: default_join_timeout(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_disk_poll_interval(),
            urgent_threshold_secs: default_urgent_threshold(),
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "screen-recorder", "recorder")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    pub fn output_directory(&self) -> PathBuf {
        self.recording
            .output_directory
            .clone()
            .unwrap_or_else(default_output_directory)
    }

    /// Input device to record from, if audio is enabled
    pub fn audio_device(&self) -> Option<String> {
        if !self.audio.enabled {
            return None;
        }
        Some(
            self.audio
                .device
                .clone()
                .unwrap_or_else(|| "default".to_string()),
        )
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            channels: self.audio.channels,
            sample_rate: self.audio.sample_rate,
            chunk_frames: self.audio.chunk_frames,
        }
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.recording
            .max_duration_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            output_dir: self.output_directory(),
            audio_format: self.audio_format(),
            join_timeout: Duration::from_secs(self.recording.join_timeout_secs),
            disk_poll_interval: Duration::from_secs(self.disk.poll_interval_secs.max(1)),
            disk_urgent_below_secs: self.disk.urgent_threshold_secs,
            ..ControllerOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_recorder_constants() {
        let config = Config::default();
        assert_eq!(config.capture.fps.get(), 30);
        assert_eq!(config.capture.container, Container::Mp4);
        assert_eq!(config.audio_format(), AudioFormat::default());
        assert_eq!(config.audio_device().as_deref(), Some("default"));
        assert_eq!(config.recording.ffmpeg_path, "ffmpeg");

        let options = config.controller_options();
        assert_eq!(options.join_timeout, Duration::from_secs(10));
        assert_eq!(options.disk_poll_interval, Duration::from_secs(5));
        assert_eq!(options.disk_urgent_below_secs, 300);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[capture]
fps = 60
container = "mkv"
region = { top = 10, left = 20, width = 800, height = 600 }

[audio]
enabled = false

[recording]
max_duration_secs = 90
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.capture.fps.get(), 60);
        assert_eq!(config.capture.container, Container::Mkv);
        assert_eq!(config.capture.region, Some(Region::new(10, 20, 800, 600)));
        assert_eq!(config.audio_device(), None);
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.max_duration(), Some(Duration::from_secs(90)));
        assert_eq!(config.disk.urgent_threshold_secs, 300);
        assert_eq!(config.config_path().unwrap(), path);
    }

    #[test]
    fn test_unsupported_fps_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[capture]\nfps = 25\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("unsupported frame rate 25"));
    }

    #[test]
    fn test_save_persists_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "").unwrap();

        let mut config = Config::load_from(&path).unwrap();
        config.recording.ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg".to_string();
        config.save().unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.recording.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
    }
}
