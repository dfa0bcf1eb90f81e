//! Session controller
//!
//! Starts, pauses, resumes and stops at most one recording session at a time
//! and hands out its final report once the session has settled.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::audio_loop::AudioLoop;
use super::disk::DiskProjector;
use super::video_loop::VideoLoop;
use super::{
    FinalReport, LoopHandle, RecordingSession, SessionControl, SessionId, SessionState,
    SessionStatus, StopOutcome,
};
use crate::audio::AudioFormat;
use crate::backend::RecordingBackend;
use crate::capture::{CaptureTarget, RegionResolver};
use crate::error::{RecorderError, RecorderResult};
use crate::mux::{MergeJob, Muxer};
use crate::video::{Container, FrameRate};

/// What to record
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub target: CaptureTarget,
    pub fps: FrameRate,
    pub container: Container,
    /// Input device id; `None` records video only
    pub audio_device: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub output_dir: PathBuf,
    pub audio_format: AudioFormat,
    /// Per-loop bound when stopping
    pub join_timeout: Duration,
    /// How long a capture loop may take to open its source and writer
    pub start_timeout: Duration,
    pub disk_poll_interval: Duration,
    pub disk_urgent_below_secs: u64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir().join("screen-recorder"),
            audio_format: AudioFormat::default(),
            join_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(10),
            disk_poll_interval: Duration::from_secs(5),
            disk_urgent_below_secs: 300,
        }
    }
}

pub struct SessionController {
    backend: Arc<dyn RecordingBackend>,
    muxer: Muxer,
    options: ControllerOptions,
    session: Option<RecordingSession>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn RecordingBackend>, muxer: Muxer, options: ControllerOptions) -> Self {
        Self {
            backend,
            muxer,
            options,
            session: None,
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(SessionState::Idle)
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Start recording `request.target`.
    ///
    /// Returns once the video loop has written its first frame. On error no
    /// session exists afterwards.
    pub fn start(&mut self, request: StartRequest) -> RecorderResult<SessionId> {
        if self.session.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        request.target.validate()?;

        let output_dir = self.options.output_dir.clone();
        fs::create_dir_all(&output_dir).map_err(|e| RecorderError::WriterOpenError {
            path: output_dir.clone(),
            reason: e.to_string(),
        })?;

        let started_at = Local::now();
        let stamp = started_at.format("%Y%m%d_%H%M%S");
        let video_path = output_dir.join(format!("video_{}.{}", stamp, request.container.extension()));
        let audio_path = output_dir.join(format!("audio_{}.wav", stamp));

        let id = Uuid::new_v4();
        let control = Arc::new(SessionControl::new());

        let audio_device = match &request.audio_device {
            Some(device) if self.backend.input_device_available(device) => Some(device.clone()),
            Some(device) => {
                let advisory = RecorderError::DeviceUnavailable(device.clone());
                warn!("{}; recording video only", advisory);
                control.add_warning(advisory.to_string());
                None
            }
            None => None,
        };

        info!(
            "Starting session {}: {:?} {} at {} -> {:?}",
            id, request.target.kind, request.target.region, request.fps, video_path
        );

        // Video first: its readiness is what makes the session real
        let (video_tx, video_rx) = mpsc::channel();
        let mut video = VideoLoop {
            backend: Arc::clone(&self.backend),
            control: Arc::clone(&control),
            resolver: RegionResolver::for_target(&request.target, self.backend.window_locator()),
            fps: request.fps,
            container: request.container,
            path: video_path.clone(),
        }
        .spawn(video_tx)?;

        let spec = match video_rx.recv_timeout(self.options.start_timeout) {
            Ok(Ok(spec)) => spec,
            Ok(Err(e)) => {
                self.abort_start(&control, &mut [&mut video], &[video_path.as_path()]);
                return Err(e);
            }
            Err(RecvTimeoutError::Timeout) => {
                self.abort_start(&control, &mut [&mut video], &[video_path.as_path()]);
                return Err(RecorderError::CaptureSourceError(format!(
                    "no frame captured within {:?}",
                    self.options.start_timeout
                )));
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.abort_start(&control, &mut [&mut video], &[video_path.as_path()]);
                return Err(RecorderError::CaptureSourceError(
                    "video capture exited before its first frame".to_string(),
                ));
            }
        };

        let mut audio = None;
        if let Some(device_id) = audio_device {
            let (audio_tx, audio_rx) = mpsc::channel();
            let mut handle = AudioLoop {
                backend: Arc::clone(&self.backend),
                control: Arc::clone(&control),
                device_id,
                preferred: self.options.audio_format,
                path: audio_path.clone(),
            }
            .spawn(audio_tx)?;

            match audio_rx.recv_timeout(self.options.start_timeout) {
                Ok(Ok(format)) => {
                    debug!("Audio format: {:?}", format);
                    audio = Some(handle);
                }
                Ok(Err(e @ RecorderError::WriterOpenError { .. })) => {
                    self.abort_start(
                        &control,
                        &mut [&mut video, &mut handle],
                        &[video_path.as_path(), audio_path.as_path()],
                    );
                    return Err(e);
                }
                Ok(Err(e)) => {
                    warn!("Audio input failed to open, recording video only: {}", e);
                    control.add_warning(e.to_string());
                    handle.join_within(self.options.join_timeout);
                }
                Err(_) => {
                    self.abort_start(
                        &control,
                        &mut [&mut video, &mut handle],
                        &[video_path.as_path(), audio_path.as_path()],
                    );
                    return Err(RecorderError::AudioStreamError(format!(
                        "audio input did not start within {:?}",
                        self.options.start_timeout
                    )));
                }
            }
        }

        let disk = match DiskProjector::spawn(
            Arc::clone(&self.backend),
            Arc::clone(&control),
            output_dir.clone(),
            spec,
            self.options.disk_poll_interval,
            self.options.disk_urgent_below_secs,
        ) {
            Ok(projector) => Some(projector),
            Err(e) => {
                warn!("Disk space projection unavailable: {}", e);
                None
            }
        };

        let audio_path = audio.as_ref().map(|_| audio_path);
        info!(
            "Recording started: session={}, video={:?}, audio={:?}",
            id, video_path, audio_path
        );

        self.session = Some(RecordingSession {
            id,
            request,
            output_dir,
            video_path,
            audio_path,
            started_at,
            control,
            video: Some(video),
            audio,
            disk,
            merge: None,
        });
        Ok(id)
    }

    /// Stop the loops of a start that will not become a session and remove
    /// whatever they already wrote; no report will ever point at those files.
    fn abort_start(&self, control: &SessionControl, loops: &mut [&mut LoopHandle], written: &[&Path]) {
        control.request_stop();
        for handle in loops.iter_mut() {
            if !handle.join_within(self.options.join_timeout) {
                warn!("{} loop did not exit after a failed start", handle.name());
            }
        }
        for path in written {
            match fs::remove_file(path) {
                Ok(()) => info!("Removed {:?} from the aborted start", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {:?} after an aborted start: {}", path, e),
            }
        }
    }

    pub fn pause(&mut self) -> RecorderResult<()> {
        self.toggle("pause", SessionState::Recording, SessionState::Paused, true)
    }

    pub fn resume(&mut self) -> RecorderResult<()> {
        self.toggle("resume", SessionState::Paused, SessionState::Recording, false)
    }

    fn toggle(
        &mut self,
        action: &'static str,
        from: SessionState,
        to: SessionState,
        paused: bool,
    ) -> RecorderResult<()> {
        let Some(session) = self.session.as_ref() else {
            return Err(RecorderError::InvalidTransition {
                action,
                state: SessionState::Idle,
            });
        };

        session
            .control
            .transition(&[from], to)
            .map_err(|state| RecorderError::InvalidTransition { action, state })?;
        session.control.set_paused(paused);
        info!("Recording {} at {:.1}s", to, session.elapsed().as_secs_f64());
        Ok(())
    }

    /// Stop the running session. Blocks while the capture loops wind down,
    /// at most the join timeout per loop.
    pub fn stop(&mut self) -> StopOutcome {
        let join_timeout = self.options.join_timeout;
        let Some(session) = self.session.as_mut() else {
            debug!("Stop ignored: no session");
            return StopOutcome::Ignored(SessionState::Idle);
        };

        if let Err(state) = session.control.transition(
            &[SessionState::Recording, SessionState::Paused],
            SessionState::Stopping,
        ) {
            debug!("Stop ignored: session is {}", state);
            return StopOutcome::Ignored(state);
        }

        info!("Stopping session {}", session.id);
        session.control.request_stop();

        let mut all_joined = true;
        for slot in [&mut session.video, &mut session.audio] {
            if let Some(handle) = slot.as_mut() {
                if handle.join_within(join_timeout) {
                    *slot = None;
                } else {
                    all_joined = false;
                    let advisory = RecorderError::JoinTimeout {
                        worker: handle.name(),
                        timeout: join_timeout,
                    };
                    warn!("{}", advisory);
                    session.control.add_warning(advisory.to_string());
                }
            }
        }
        if let Some(mut disk) = session.disk.take() {
            disk.stop();
        }

        if session.control.state() == SessionState::Failed {
            return StopOutcome::Failed;
        }

        let audio_ready = session
            .audio_path
            .as_ref()
            .filter(|path| path.exists())
            .cloned();

        match audio_ready {
            Some(audio) if all_joined && session.video_path.exists() => {
                let _ = session
                    .control
                    .transition(&[SessionState::Stopping], SessionState::Merging);
                let job = MergeJob {
                    video: session.video_path.clone(),
                    audio,
                    container: session.request.container,
                };

                let control = Arc::clone(&session.control);
                let spawned = self.muxer.spawn(job, move |outcome| {
                    if let Some(diagnostic) = &outcome.diagnostic {
                        control.add_warning(format!("audio not merged: {}", diagnostic));
                    }
                    control.set_merge_outcome(outcome);
                    let _ = control.transition(&[SessionState::Merging], SessionState::Finalized);
                });

                match spawned {
                    Ok(handle) => {
                        session.merge = Some(handle);
                        StopOutcome::Merging
                    }
                    Err(e) => {
                        warn!("Failed to start merge, keeping separate files: {}", e);
                        session.control.add_warning(format!("audio not merged: {}", e));
                        let _ = session
                            .control
                            .transition(&[SessionState::Merging], SessionState::Finalized);
                        StopOutcome::Finalized
                    }
                }
            }
            other => {
                if other.is_some() {
                    session
                        .control
                        .add_warning("merge skipped: a capture loop is still running");
                }
                let _ = session
                    .control
                    .transition(&[SessionState::Stopping], SessionState::Finalized);
                info!("Session {} finalized: {:?}", session.id, session.video_path);
                StopOutcome::Finalized
            }
        }
    }

    /// Collect the report of a Finalized or Failed session and return to Idle.
    /// `None` while no session has settled.
    pub fn finalize_outcome(&mut self) -> Option<FinalReport> {
        if !self.state().is_terminal() {
            return None;
        }
        let mut session = self.session.take()?;
        let join_timeout = self.options.join_timeout;

        // A failed session skipped stop(); reap its workers here
        session.control.request_stop();
        for handle in [session.video.as_mut(), session.audio.as_mut()]
            .into_iter()
            .flatten()
        {
            if !handle.join_within(join_timeout) {
                let advisory = RecorderError::JoinTimeout {
                    worker: handle.name(),
                    timeout: join_timeout,
                };
                warn!("{}", advisory);
                session.control.add_warning(advisory.to_string());
            }
        }
        if let Some(mut disk) = session.disk.take() {
            disk.stop();
        }
        if let Some(merge) = session.merge.take() {
            let _ = merge.join();
        }

        let merged = session
            .control
            .merge_outcome()
            .map(|m| m.merged)
            .unwrap_or(false);
        let audio_path_if_unmerged = if merged {
            None
        } else {
            session.audio_path.clone().filter(|path| path.exists())
        };

        let report = FinalReport {
            session_id: session.id,
            state: session.control.state(),
            video_path: session.video_path.clone(),
            audio_path_if_unmerged,
            merged,
            warnings: session.control.warnings(),
            error: session.control.failure_message(),
            elapsed_seconds: session.elapsed().as_secs_f64(),
        };
        info!(
            "Session {} {}: video={:?}, merged={}",
            report.session_id, report.state, report.video_path, report.merged
        );
        Some(report)
    }

    pub fn status(&self) -> SessionStatus {
        match &self.session {
            None => SessionStatus::idle(),
            Some(session) => SessionStatus {
                session_id: Some(session.id),
                state: session.control.state(),
                elapsed_seconds: session.elapsed().as_secs_f64(),
                disk_estimate: session.control.disk_estimate(),
                last_error: session.control.failure_message(),
                warnings: session.control.warnings(),
            },
        }
    }

    /// Block until the session is Finalized or Failed (or `timeout` passes)
    pub fn wait_for_terminal(&self, timeout: Duration) -> SessionState {
        match &self.session {
            Some(session) => session.control.wait_for(SessionState::is_terminal, timeout),
            None => SessionState::Idle,
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(session) = self.session.as_ref() {
            if !session.state().is_terminal() {
                warn!("Controller dropped with session {} still {}", session.id, session.state());
                session.control.request_stop();
            }
        }
    }
}
