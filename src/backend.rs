//! Platform backend for the recording pipeline
//!
//! Everything the session touches on the host (screens, windows, audio
//! devices, encoders, free disk space) goes through [`RecordingBackend`].
//! Sources and sinks are opened on the capture loop threads that use them,
//! so the boxed values don't need to be `Send`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::audio::{self, AudioFormat, AudioSink, AudioSource, CpalAudioSource, WavSink};
use crate::capture::{FrameSource, ScreenFrameSource, SystemWindowLocator, WindowLocator};
use crate::error::RecorderResult;
use crate::video::{Container, FfmpegVideoSink, VideoSink, VideoSpec};

pub trait RecordingBackend: Send + Sync {
    fn open_frame_source(&self) -> RecorderResult<Box<dyn FrameSource>>;

    fn open_video_sink(
        &self,
        path: &Path,
        spec: VideoSpec,
        container: Container,
    ) -> RecorderResult<Box<dyn VideoSink>>;

    fn input_device_available(&self, device_id: &str) -> bool;

    fn open_audio_source(
        &self,
        device_id: &str,
        preferred: AudioFormat,
    ) -> RecorderResult<Box<dyn AudioSource>>;

    fn open_audio_sink(&self, path: &Path, format: AudioFormat) -> RecorderResult<Box<dyn AudioSink>>;

    fn window_locator(&self) -> Arc<dyn WindowLocator>;

    /// Bytes available to this process on the volume holding `dir`.
    /// `None` when the platform can't tell.
    fn available_bytes(&self, dir: &Path) -> RecorderResult<Option<u64>>;
}

/// Backend using the host's screens, cpal audio and an ffmpeg encoder
pub struct SystemBackend {
    ffmpeg_path: PathBuf,
}

impl SystemBackend {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }
}

/// Create the backend for the current platform
pub fn create_backend(ffmpeg_path: PathBuf) -> Arc<dyn RecordingBackend> {
    info!("Using system recording backend (encoder: {:?})", ffmpeg_path);
    Arc::new(SystemBackend::new(ffmpeg_path))
}

impl RecordingBackend for SystemBackend {
    fn open_frame_source(&self) -> RecorderResult<Box<dyn FrameSource>> {
        Ok(Box::new(ScreenFrameSource::open()?))
    }

    fn open_video_sink(
        &self,
        path: &Path,
        spec: VideoSpec,
        container: Container,
    ) -> RecorderResult<Box<dyn VideoSink>> {
        Ok(Box::new(FfmpegVideoSink::open(
            &self.ffmpeg_path,
            path,
            spec,
            container,
        )?))
    }

    fn input_device_available(&self, device_id: &str) -> bool {
        audio::input_device_available(device_id)
    }

    fn open_audio_source(
        &self,
        device_id: &str,
        preferred: AudioFormat,
    ) -> RecorderResult<Box<dyn AudioSource>> {
        Ok(Box::new(CpalAudioSource::open(device_id, preferred)?))
    }

    fn open_audio_sink(&self, path: &Path, format: AudioFormat) -> RecorderResult<Box<dyn AudioSink>> {
        Ok(Box::new(WavSink::create(path, format)?))
    }

    fn window_locator(&self) -> Arc<dyn WindowLocator> {
        Arc::new(SystemWindowLocator)
    }

    fn available_bytes(&self, dir: &Path) -> RecorderResult<Option<u64>> {
        free_space::available_bytes(dir)
    }
}

#[cfg(unix)]
mod free_space {
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    use crate::error::RecorderResult;

    pub fn available_bytes(dir: &Path) -> RecorderResult<Option<u64>> {
        let c_path = CString::new(dir.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(io::Error::last_os_error().into());
            }
            #[allow(clippy::unnecessary_cast)]
            let available = stat.f_bavail as u64 * stat.f_frsize as u64;
            Ok(Some(available))
        }
    }
}

#[cfg(windows)]
mod free_space {
    use std::io;
    use std::path::Path;
    use windows::core::HSTRING;
    use windows::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

    use crate::error::RecorderResult;

    pub fn available_bytes(dir: &Path) -> RecorderResult<Option<u64>> {
        let path = HSTRING::from(dir.as_os_str());
        let mut available: u64 = 0;
        unsafe {
            GetDiskFreeSpaceExW(&path, Some(&mut available), None, None)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        }
        Ok(Some(available))
    }
}

#[cfg(not(any(unix, windows)))]
mod free_space {
    use std::path::Path;

    use crate::error::RecorderResult;

    pub fn available_bytes(_dir: &Path) -> RecorderResult<Option<u64>> {
        Ok(None)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_available_bytes_for_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SystemBackend::new(PathBuf::from("ffmpeg"));
        let free = backend.available_bytes(dir.path()).unwrap();
        assert!(free.is_some());
    }

    #[test]
    fn test_available_bytes_for_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SystemBackend::new(PathBuf::from("ffmpeg"));
        assert!(backend.available_bytes(&dir.path().join("nope")).is_err());
    }
}
