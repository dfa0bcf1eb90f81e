//! Microphone capture and WAV output
//!
//! The audio capture loop pulls fixed-size PCM16 chunks from an
//! [`AudioSource`] and flushes them to an [`AudioSink`] once recording stops.

mod device;
mod source;
mod wav;

pub use device::{input_device_available, list_input_devices, AudioDevice};
pub use source::CpalAudioSource;
pub use wav::WavSink;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::RecorderResult;

/// PCM16 stream parameters, fixed for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub channels: u16,
    pub sample_rate: u32,
    /// Frames (samples per channel) in one chunk
    pub chunk_frames: usize,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 44_100,
            chunk_frames: 1024,
        }
    }
}

impl AudioFormat {
    /// Interleaved samples in one chunk
    pub fn chunk_samples(&self) -> usize {
        self.chunk_frames * self.channels as usize
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_frames as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Pulls PCM16 chunks from an input device
pub trait AudioSource {
    /// Format actually negotiated with the device
    fn format(&self) -> AudioFormat;

    /// Wait up to `timeout` for one full chunk of interleaved samples.
    /// `Ok(None)` means nothing complete arrived in time.
    fn read_chunk(&mut self, timeout: Duration) -> RecorderResult<Option<Vec<i16>>>;

    /// Drop whatever the device buffered (used while paused)
    fn discard_buffered(&mut self) {}

    /// Stop the input stream
    fn close(&mut self) {}
}

/// Writes a session's PCM16 audio to disk
pub trait AudioSink {
    fn path(&self) -> &Path;

    /// Append chunks in order as one linear write
    fn write_chunks(&mut self, chunks: &[Vec<i16>]) -> RecorderResult<()>;

    fn finish(self: Box<Self>) -> RecorderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_matches_stereo_cd_quality() {
        let format = AudioFormat::default();
        assert_eq!(format.chunk_samples(), 2048);
        let ms = format.chunk_duration().as_secs_f64() * 1000.0;
        assert!((ms - 23.22).abs() < 0.01, "chunk duration {}ms", ms);
    }
}
