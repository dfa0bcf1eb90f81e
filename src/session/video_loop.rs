//! Video capture loop

use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

use super::{LoopHandle, SessionControl, PAUSE_POLL};
use crate::backend::RecordingBackend;
use crate::capture::RegionResolver;
use crate::error::{RecorderError, RecorderResult};
use crate::video::{convert_frame, Container, FrameRate, VideoSink, VideoSpec};

pub(crate) struct VideoLoop {
    pub backend: Arc<dyn RecordingBackend>,
    pub control: Arc<SessionControl>,
    pub resolver: RegionResolver,
    pub fps: FrameRate,
    pub container: Container,
    pub path: PathBuf,
}

/// Readiness handshake: the pinned encoder spec once the first frame is
/// written, or the error that kept the loop from getting there.
pub(crate) type VideoReady = Sender<RecorderResult<VideoSpec>>;

impl VideoLoop {
    pub(crate) fn spawn(self, ready: VideoReady) -> std::io::Result<LoopHandle> {
        LoopHandle::spawn("video", move || self.run(ready))
    }

    fn run(mut self, ready: VideoReady) {
        let mut ready = Some(ready);
        let mut sink: Option<Box<dyn VideoSink>> = None;

        let result = self.capture(&mut sink, &mut ready);

        let finished = match sink {
            Some(sink) => sink.finish(),
            None => Ok(()),
        };

        for err in [result.err(), finished.err()].into_iter().flatten() {
            match ready.take() {
                Some(tx) => {
                    let _ = tx.send(Err(err));
                }
                None => {
                    self.control.fail(err);
                }
            }
        }
        debug!("Video loop exited");
    }

    fn capture(
        &mut self,
        sink: &mut Option<Box<dyn VideoSink>>,
        ready: &mut Option<VideoReady>,
    ) -> RecorderResult<()> {
        let mut source = self.backend.open_frame_source()?;
        let interval = self.fps.frame_interval();
        let mut frames: u64 = 0;

        loop {
            if self.control.stop_requested() {
                break;
            }
            if self.control.is_paused() {
                thread::sleep(PAUSE_POLL);
                continue;
            }

            let region = self.resolver.resolve()?;
            let frame = source.grab(region)?;

            if sink.is_none() {
                let spec = VideoSpec {
                    width: frame.width(),
                    height: frame.height(),
                    fps: self.fps,
                };
                *sink = Some(
                    self.backend
                        .open_video_sink(&self.path, spec, self.container)?,
                );
            }
            let Some(writer) = sink.as_mut() else {
                return Err(RecorderError::CaptureSourceError(
                    "video writer missing".to_string(),
                ));
            };

            let layout = writer.layout();
            writer.write_frame(&convert_frame(&frame, layout))?;
            frames += 1;

            if let Some(tx) = ready.take() {
                info!("Video capture running: {:?} at {}", self.path, self.fps);
                let _ = tx.send(Ok(writer.spec()));
            }

            self.control.sleep_unless_interrupted(interval);
        }

        debug!("Video loop captured {} frames", frames);
        Ok(())
    }
}
