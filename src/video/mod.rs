//! Video encoding
//!
//! [`VideoSink`] is the encoder seam used by the video capture loop. The
//! system implementation pipes raw frames into an ffmpeg process.

mod ffmpeg;

pub use ffmpeg::FfmpegVideoSink;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RecorderError, RecorderResult};

/// Frame rates a session may record at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct FrameRate(u32);

impl FrameRate {
    pub const SUPPORTED: [u32; 4] = [30, 60, 100, 120];

    pub fn get(self) -> u32 {
        self.0
    }

    /// Sleep between two samples
    pub fn frame_interval(self) -> Duration {
        Duration::from_secs_f64(1.0 / self.0 as f64)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        FrameRate(30)
    }
}

impl TryFrom<u32> for FrameRate {
    type Error = RecorderError;

    fn try_from(fps: u32) -> Result<Self, Self::Error> {
        if Self::SUPPORTED.contains(&fps) {
            Ok(FrameRate(fps))
        } else {
            Err(RecorderError::InvalidFrameRate(fps))
        }
    }
}

impl From<FrameRate> for u32 {
    fn from(fps: FrameRate) -> Self {
        fps.0
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fps", self.0)
    }
}

/// Output container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Avi,
    Mkv,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Avi => "avi",
            Container::Mkv => "mkv",
        }
    }

    /// ffmpeg audio encoder native to the container
    pub fn audio_codec(self) -> &'static str {
        match self {
            Container::Mp4 | Container::Mkv => "aac",
            Container::Avi => "libmp3lame",
        }
    }

    /// ffmpeg video encoder arguments for the capture writer
    pub fn video_codec_args(self) -> &'static [&'static str] {
        match self {
            Container::Mp4 | Container::Mkv => &["-c:v", "mpeg4", "-q:v", "5"],
            Container::Avi => &["-c:v", "mpeg4", "-vtag", "xvid", "-q:v", "5"],
        }
    }
}

impl FromStr for Container {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(Container::Mp4),
            "avi" => Ok(Container::Avi),
            "mkv" => Ok(Container::Mkv),
            other => Err(format!("unsupported container '{}' (expected mp4, avi or mkv)", other)),
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Byte layout the sink expects for each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb24,
    Bgr24,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        3
    }

    pub fn ffmpeg_pix_fmt(self) -> &'static str {
        match self {
            PixelLayout::Rgb24 => "rgb24",
            PixelLayout::Bgr24 => "bgr24",
        }
    }
}

/// Encoder parameters pinned when the writer opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub fps: FrameRate,
}

impl VideoSpec {
    pub fn frame_len(&self, layout: PixelLayout) -> usize {
        self.width as usize * self.height as usize * layout.bytes_per_pixel()
    }
}

/// Encodes frames into a video container file
pub trait VideoSink {
    fn layout(&self) -> PixelLayout;

    fn spec(&self) -> VideoSpec;

    fn path(&self) -> &Path;

    /// Write one frame already converted to [`VideoSink::layout`]
    fn write_frame(&mut self, frame: &[u8]) -> RecorderResult<()>;

    /// Flush and close the container
    fn finish(self: Box<Self>) -> RecorderResult<()>;
}

/// Drop alpha and reorder channels for the sink
pub fn convert_frame(frame: &RgbaImage, layout: PixelLayout) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.width() as usize * frame.height() as usize * 3);
    match layout {
        PixelLayout::Rgb24 => {
            for px in frame.as_raw().chunks_exact(4) {
                out.extend_from_slice(&[px[0], px[1], px[2]]);
            }
        }
        PixelLayout::Bgr24 => {
            for px in frame.as_raw().chunks_exact(4) {
                out.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }
    }
    out
}

/// Ensure a value is even (required by yuv420p encoders)
pub fn make_even(v: u32) -> u32 {
    if v % 2 == 0 {
        v
    } else {
        v + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate_validation() {
        for fps in FrameRate::SUPPORTED {
            assert_eq!(FrameRate::try_from(fps).unwrap().get(), fps);
        }
        assert!(matches!(
            FrameRate::try_from(20),
            Err(RecorderError::InvalidFrameRate(20))
        ));
        assert_eq!(
            FrameRate::try_from(60).unwrap().frame_interval(),
            Duration::from_secs_f64(1.0 / 60.0)
        );
    }

    #[test]
    fn test_container_parsing() {
        assert_eq!("MP4".parse::<Container>().unwrap(), Container::Mp4);
        assert_eq!("mkv".parse::<Container>().unwrap(), Container::Mkv);
        assert!("webm".parse::<Container>().is_err());
        assert_eq!(Container::Avi.audio_codec(), "libmp3lame");
        assert_eq!(Container::Mp4.audio_codec(), "aac");
    }

    #[test]
    fn test_convert_frame_layouts() {
        let mut frame = RgbaImage::new(2, 1);
        frame.put_pixel(0, 0, image::Rgba([10, 20, 30, 255]));
        frame.put_pixel(1, 0, image::Rgba([40, 50, 60, 0]));

        assert_eq!(
            convert_frame(&frame, PixelLayout::Rgb24),
            vec![10, 20, 30, 40, 50, 60]
        );
        assert_eq!(
            convert_frame(&frame, PixelLayout::Bgr24),
            vec![30, 20, 10, 60, 50, 40]
        );
    }

    #[test]
    fn test_make_even() {
        assert_eq!(make_even(1920), 1920);
        assert_eq!(make_even(1081), 1082);
    }
}
