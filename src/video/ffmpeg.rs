//! Video writer that pipes raw frames into ffmpeg
//!
//! ffmpeg reads `rawvideo` frames on stdin, pads odd dimensions to even ones
//! and encodes into the requested container. Its stderr is drained on a
//! helper thread so the pipe never fills; the last lines are kept for error
//! reports.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info};

use super::{make_even, Container, PixelLayout, VideoSink, VideoSpec};
use crate::error::{RecorderError, RecorderResult};

const STDERR_TAIL_LINES: usize = 20;

pub struct FfmpegVideoSink {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    path: PathBuf,
    spec: VideoSpec,
    frames: u64,
}

impl FfmpegVideoSink {
    pub fn open(
        ffmpeg: &Path,
        path: &Path,
        spec: VideoSpec,
        container: Container,
    ) -> RecorderResult<Self> {
        let layout = PixelLayout::Rgb24;
        let pad = format!(
            "pad={}:{}",
            make_even(spec.width),
            make_even(spec.height)
        );

        let mut command = Command::new(ffmpeg);
        command
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", layout.ffmpeg_pix_fmt()])
            .args(["-s", &format!("{}x{}", spec.width, spec.height)])
            .args(["-r", &spec.fps.get().to_string()])
            .args(["-i", "pipe:0"])
            .args(["-vf", &pad])
            .args(container.video_codec_args())
            .args(["-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| RecorderError::WriterOpenError {
            path: path.to_path_buf(),
            reason: if e.kind() == std::io::ErrorKind::NotFound {
                format!("encoder '{}' not found", ffmpeg.display())
            } else {
                e.to_string()
            },
        })?;

        let stdin = child.stdin.take().ok_or_else(|| RecorderError::WriterOpenError {
            path: path.to_path_buf(),
            reason: "encoder stdin unavailable".to_string(),
        })?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&stderr_tail);
            thread::Builder::new()
                .name("video-encoder-stderr".into())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        debug!("ffmpeg: {}", line);
                        if let Ok(mut tail) = tail.lock() {
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                    }
                })?;
        }

        info!(
            "Video writer opened: {:?} ({}x{} @ {}, {})",
            path, spec.width, spec.height, spec.fps, container
        );

        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            stderr_tail,
            path: path.to_path_buf(),
            spec,
            frames: 0,
        })
    }

    fn stderr_summary(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    fn write_error(&self, reason: impl Into<String>) -> RecorderError {
        let mut reason = reason.into();
        let stderr = self.stderr_summary();
        if !stderr.is_empty() {
            reason = format!("{} ({})", reason, stderr);
        }
        RecorderError::SinkWriteError {
            path: self.path.clone(),
            reason,
        }
    }
}

impl VideoSink for FfmpegVideoSink {
    fn layout(&self) -> PixelLayout {
        PixelLayout::Rgb24
    }

    fn spec(&self) -> VideoSpec {
        self.spec
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &[u8]) -> RecorderResult<()> {
        let expected = self.spec.frame_len(self.layout());
        if frame.len() != expected {
            return Err(self.write_error(format!(
                "frame is {} bytes, encoder expects {} ({}x{})",
                frame.len(),
                expected,
                self.spec.width,
                self.spec.height
            )));
        }

        let result = match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(frame),
            None => return Err(self.write_error("writer already closed")),
        };
        result.map_err(|e| self.write_error(e.to_string()))?;
        self.frames += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> RecorderResult<()> {
        let (flushed, status) = close_encoder(self.stdin.take(), &mut self.child);
        flushed.map_err(|e| self.write_error(e.to_string()))?;
        let status = status.map_err(|e| self.write_error(e.to_string()))?;
        if !status.success() {
            return Err(self.write_error(format!("encoder exited with {}", status)));
        }

        info!("Video writer closed: {:?} ({} frames)", self.path, self.frames);
        Ok(())
    }
}

/// Flush and drop the encoder's stdin (EOF lets ffmpeg finalize the
/// container), then reap the child whether or not the flush worked.
fn close_encoder<W: Write>(
    stdin: Option<W>,
    child: &mut Child,
) -> (std::io::Result<()>, std::io::Result<ExitStatus>) {
    let flushed = match stdin {
        Some(mut stdin) => stdin.flush(),
        None => Ok(()),
    };
    (flushed, child.wait())
}

impl Drop for FfmpegVideoSink {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            // Not finished: let ffmpeg see EOF and reap it
            let _ = self.child.wait();
        }
    }
}
