//! Post-recording audio/video merge
//!
//! The muxer combines the finished video file and WAV file into one container
//! with an external encoder, copying the video stream and encoding the audio.
//! Originals are only removed once the merged file has replaced the video.

use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

use crate::error::{RecorderError, RecorderResult};
use crate::video::Container;

/// Exit status and stderr of one encoder run
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stderr: String,
}

/// Runs the external encoder
pub trait EncoderRunner: Send + Sync {
    fn program(&self) -> &str;

    fn run(&self, args: &[OsString]) -> io::Result<EncoderOutput>;
}

pub struct FfmpegRunner {
    program: String,
}

impl FfmpegRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl EncoderRunner for FfmpegRunner {
    fn program(&self) -> &str {
        &self.program
    }

    fn run(&self, args: &[OsString]) -> io::Result<EncoderOutput> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;

        Ok(EncoderOutput {
            code: output.status.code(),
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MergeJob {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub container: Container,
}

/// Result of a merge attempt
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub merged: bool,
    pub video_path: PathBuf,
    /// Still on disk when the merge did not happen
    pub audio_path: Option<PathBuf>,
    pub diagnostic: Option<String>,
}

impl MergeOutcome {
    fn merged(job: &MergeJob) -> Self {
        Self {
            merged: true,
            video_path: job.video.clone(),
            audio_path: None,
            diagnostic: None,
        }
    }

    fn preserved(job: &MergeJob, diagnostic: String) -> Self {
        Self {
            merged: false,
            video_path: job.video.clone(),
            audio_path: Some(job.audio.clone()),
            diagnostic: Some(diagnostic),
        }
    }
}

/// `<dir>/<stem>_temp.<ext>` next to the video
pub fn temp_output_path(video: &Path, container: Container) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    video.with_file_name(format!("{}_temp.{}", stem, container.extension()))
}

pub fn merge_args(job: &MergeJob, temp: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(14);
    args.push("-i".into());
    args.push(job.video.clone().into_os_string());
    args.push("-i".into());
    args.push(job.audio.clone().into_os_string());
    for arg in ["-c:v", "copy", "-c:a", job.container.audio_codec()] {
        args.push(arg.into());
    }
    for arg in ["-strict", "experimental", "-y"] {
        args.push(arg.into());
    }
    args.push(temp.as_os_str().to_os_string());
    args
}

#[derive(Clone)]
pub struct Muxer {
    runner: Arc<dyn EncoderRunner>,
}

impl Muxer {
    pub fn new(runner: Arc<dyn EncoderRunner>) -> Self {
        Self { runner }
    }

    pub fn ffmpeg(program: impl Into<String>) -> Self {
        Self::new(Arc::new(FfmpegRunner::new(program)))
    }

    /// Merge synchronously. Never fails: every error becomes a preserved outcome.
    pub fn merge(&self, job: &MergeJob) -> MergeOutcome {
        let temp = temp_output_path(&job.video, job.container);
        info!(
            "Merging {:?} + {:?} into {:?}",
            job.video, job.audio, job.video
        );

        match self.try_merge(job, &temp) {
            Ok(()) => {
                info!("Video and audio merged: {:?}", job.video);
                MergeOutcome::merged(job)
            }
            Err(e) => {
                warn!("Merge failed, keeping separate files: {}", e);
                remove_if_exists(&temp);
                MergeOutcome::preserved(job, e.to_string())
            }
        }
    }

    fn try_merge(&self, job: &MergeJob, temp: &Path) -> RecorderResult<()> {
        let output = match self.runner.run(&merge_args(job, temp)) {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RecorderError::ExternalToolMissing(
                    self.runner.program().to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        if !output.success {
            return Err(RecorderError::ExternalToolFailed {
                code: output.code,
                stderr: output.stderr,
            });
        }

        let produced = fs::metadata(temp).map(|m| m.len()).unwrap_or(0);
        if produced == 0 {
            return Err(RecorderError::ExternalToolFailed {
                code: output.code,
                stderr: format!("encoder reported success but wrote no output to {:?}", temp),
            });
        }

        // rename replaces the video in place; the originals stay intact until it succeeds
        fs::rename(temp, &job.video)?;

        if let Err(e) = fs::remove_file(&job.audio) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Merged, but failed to remove {:?}: {}", job.audio, e);
            }
        }
        Ok(())
    }

    /// Merge on a background thread and hand the outcome to `on_complete`
    pub fn spawn<F>(&self, job: MergeJob, on_complete: F) -> io::Result<thread::JoinHandle<()>>
    where
        F: FnOnce(MergeOutcome) + Send + 'static,
    {
        let muxer = self.clone();
        thread::Builder::new()
            .name("muxer".into())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| muxer.merge(&job)))
                    .unwrap_or_else(|_| {
                        error!("Muxer panicked, keeping separate files");
                        remove_if_exists(&temp_output_path(&job.video, job.container));
                        MergeOutcome::preserved(&job, "muxer panicked".to_string())
                    });
                on_complete(outcome);
            })
    }
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}
