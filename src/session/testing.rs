//! In-memory backend for session tests

use image::RgbaImage;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::{AudioFormat, AudioSink, AudioSource, WavSink};
use crate::backend::RecordingBackend;
use crate::capture::{FrameSource, Region, WindowLocator};
use crate::error::{RecorderError, RecorderResult};
use crate::video::{Container, PixelLayout, VideoSink, VideoSpec};

#[derive(Default)]
struct Counters {
    frames_written: AtomicUsize,
    chunks_read: AtomicUsize,
}

pub(crate) struct FakeBackend {
    counters: Arc<Counters>,
    free_bytes: u64,
    fail_video_writer: bool,
    capture_failure_after: Option<usize>,
    audio_failure_after: Option<usize>,
    fail_audio_writer: bool,
    audio_stall: Option<(usize, Duration)>,
}

impl FakeBackend {
    /// Size of every grabbed frame, whatever the region
    pub(crate) const FRAME_SIZE: (u32, u32) = (64, 36);
    pub(crate) const DEVICE: &'static str = "Fake Mic";

    pub(crate) fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            free_bytes: 500 * 1024 * 1024 * 1024,
            fail_video_writer: false,
            capture_failure_after: None,
            audio_failure_after: None,
            fail_audio_writer: false,
            audio_stall: None,
        }
    }

    pub(crate) fn with_failing_video_writer(mut self) -> Self {
        self.fail_video_writer = true;
        self
    }

    pub(crate) fn with_capture_failure_after(mut self, frames: usize) -> Self {
        self.capture_failure_after = Some(frames);
        self
    }

    pub(crate) fn with_audio_failure_after(mut self, chunks: usize) -> Self {
        self.audio_failure_after = Some(chunks);
        self
    }

    pub(crate) fn with_failing_audio_writer(mut self) -> Self {
        self.fail_audio_writer = true;
        self
    }

    /// The mic hangs for `stall` after delivering `chunks` chunks, ignoring
    /// read timeouts, like a driver that stopped answering
    pub(crate) fn with_audio_stall_after(mut self, chunks: usize, stall: Duration) -> Self {
        self.audio_stall = Some((chunks, stall));
        self
    }

    pub(crate) fn with_free_bytes(mut self, free_bytes: u64) -> Self {
        self.free_bytes = free_bytes;
        self
    }

    pub(crate) fn frames_written(&self) -> usize {
        self.counters.frames_written.load(Ordering::SeqCst)
    }

    pub(crate) fn chunks_read(&self) -> usize {
        self.counters.chunks_read.load(Ordering::SeqCst)
    }
}

impl RecordingBackend for FakeBackend {
    fn open_frame_source(&self) -> RecorderResult<Box<dyn FrameSource>> {
        Ok(Box::new(FakeFrames {
            grabbed: 0,
            fail_after: self.capture_failure_after,
        }))
    }

    fn open_video_sink(
        &self,
        path: &Path,
        spec: VideoSpec,
        _container: Container,
    ) -> RecorderResult<Box<dyn VideoSink>> {
        if self.fail_video_writer {
            return Err(RecorderError::WriterOpenError {
                path: path.to_path_buf(),
                reason: "encoder refused to start".to_string(),
            });
        }
        let file = File::create(path)?;
        Ok(Box::new(FakeVideoSink {
            file,
            path: path.to_path_buf(),
            spec,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn input_device_available(&self, device_id: &str) -> bool {
        device_id == Self::DEVICE
    }

    fn open_audio_source(
        &self,
        device_id: &str,
        preferred: AudioFormat,
    ) -> RecorderResult<Box<dyn AudioSource>> {
        if device_id != Self::DEVICE {
            return Err(RecorderError::DeviceUnavailable(device_id.to_string()));
        }
        Ok(Box::new(FakeMic {
            format: preferred,
            counters: Arc::clone(&self.counters),
            read: 0,
            fail_after: self.audio_failure_after,
            stall: self.audio_stall,
        }))
    }

    fn open_audio_sink(&self, path: &Path, format: AudioFormat) -> RecorderResult<Box<dyn AudioSink>> {
        if self.fail_audio_writer {
            return Err(RecorderError::WriterOpenError {
                path: path.to_path_buf(),
                reason: "read-only volume".to_string(),
            });
        }
        Ok(Box::new(WavSink::create(path, format)?))
    }

    fn window_locator(&self) -> Arc<dyn WindowLocator> {
        Arc::new(NoWindows)
    }

    fn available_bytes(&self, _dir: &Path) -> RecorderResult<Option<u64>> {
        Ok(Some(self.free_bytes))
    }
}

struct FakeFrames {
    grabbed: usize,
    fail_after: Option<usize>,
}

impl FrameSource for FakeFrames {
    fn grab(&mut self, _region: Region) -> RecorderResult<RgbaImage> {
        if self.fail_after == Some(self.grabbed) {
            return Err(RecorderError::CaptureSourceError("display disconnected".to_string()));
        }
        self.grabbed += 1;
        let (w, h) = FakeBackend::FRAME_SIZE;
        Ok(RgbaImage::from_pixel(w, h, image::Rgba([0, 128, 255, 255])))
    }
}

struct FakeVideoSink {
    file: File,
    path: PathBuf,
    spec: VideoSpec,
    counters: Arc<Counters>,
}

impl VideoSink for FakeVideoSink {
    fn layout(&self) -> PixelLayout {
        PixelLayout::Bgr24
    }

    fn spec(&self) -> VideoSpec {
        self.spec
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &[u8]) -> RecorderResult<()> {
        assert_eq!(frame.len(), self.spec.frame_len(self.layout()));
        self.file.write_all(frame)?;
        self.counters.frames_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish(self: Box<Self>) -> RecorderResult<()> {
        self.file.sync_all()?;
        assert!(fs::metadata(&self.path)?.len() > 0);
        Ok(())
    }
}

/// Produces silence at the real chunk rate
struct FakeMic {
    format: AudioFormat,
    counters: Arc<Counters>,
    read: usize,
    fail_after: Option<usize>,
    stall: Option<(usize, Duration)>,
}

impl AudioSource for FakeMic {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read_chunk(&mut self, timeout: Duration) -> RecorderResult<Option<Vec<i16>>> {
        if self.fail_after == Some(self.read) {
            return Err(RecorderError::AudioStreamError("device unplugged".to_string()));
        }
        if let Some((after, stall)) = self.stall {
            if self.read == after {
                self.stall = None;
                thread::sleep(stall);
            }
        }
        let chunk_duration = self.format.chunk_duration();
        if chunk_duration > timeout {
            thread::sleep(timeout);
            return Ok(None);
        }
        thread::sleep(chunk_duration);
        self.read += 1;
        self.counters.chunks_read.fetch_add(1, Ordering::SeqCst);
        Ok(Some(vec![0; self.format.chunk_samples()]))
    }
}

struct NoWindows;

impl WindowLocator for NoWindows {
    fn window_rect(&self, handle: u64) -> RecorderResult<Region> {
        Err(RecorderError::TargetGone(format!("window {}", handle)))
    }
}
