//! Audio capture loop
//!
//! Chunks are kept in memory in arrival order and written to the WAV file in
//! one pass after the stream is closed.

use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

use super::{LoopHandle, SessionControl, PAUSE_POLL};
use crate::audio::{AudioFormat, AudioSink, AudioSource};
use crate::backend::RecordingBackend;
use crate::error::RecorderResult;

pub(crate) struct AudioLoop {
    pub backend: Arc<dyn RecordingBackend>,
    pub control: Arc<SessionControl>,
    pub device_id: String,
    pub preferred: AudioFormat,
    pub path: PathBuf,
}

/// Readiness handshake: the negotiated format once both the input stream
/// and the WAV file are open.
pub(crate) type AudioReady = Sender<RecorderResult<AudioFormat>>;

impl AudioLoop {
    pub(crate) fn spawn(self, ready: AudioReady) -> std::io::Result<LoopHandle> {
        LoopHandle::spawn("audio", move || self.run(ready))
    }

    fn run(self, ready: AudioReady) {
        let (mut source, sink) = match self.open() {
            Ok(opened) => opened,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let format = source.format();
        let _ = ready.send(Ok(format));

        let mut chunks: Vec<Vec<i16>> = Vec::new();
        let result = self.capture(source.as_mut(), &mut chunks);
        source.close();

        if let Err(e) = result {
            self.control.fail(e);
        }

        // Whatever was captured is written, even after a stream failure
        if let Err(e) = flush(sink, &chunks) {
            self.control.fail(e);
        }
        debug!("Audio loop exited");
    }

    fn open(&self) -> RecorderResult<(Box<dyn AudioSource>, Box<dyn AudioSink>)> {
        let source = self
            .backend
            .open_audio_source(&self.device_id, self.preferred)?;
        let sink = self.backend.open_audio_sink(&self.path, source.format())?;
        info!("Audio capture running: {:?}", self.path);
        Ok((source, sink))
    }

    fn capture(&self, source: &mut dyn AudioSource, chunks: &mut Vec<Vec<i16>>) -> RecorderResult<()> {
        loop {
            if self.control.stop_requested() {
                return Ok(());
            }
            if self.control.is_paused() {
                source.discard_buffered();
                thread::sleep(PAUSE_POLL);
                continue;
            }

            if let Some(chunk) = source.read_chunk(PAUSE_POLL)? {
                chunks.push(chunk);
            }
        }
    }
}

fn flush(mut sink: Box<dyn AudioSink>, chunks: &[Vec<i16>]) -> RecorderResult<()> {
    debug!("Writing {} audio chunks to {:?}", chunks.len(), sink.path());
    sink.write_chunks(chunks)?;
    sink.finish()
}
