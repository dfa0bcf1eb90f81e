//! Recording sessions
//!
//! A session owns two capture loops (video and, optionally, audio), a disk
//! space projector and, once stopped, a background merge. The loops only
//! share a [`SessionControl`]: atomic pause/stop flags plus the guarded
//! session state.

mod audio_loop;
mod controller;
mod disk;
mod engine;
#[cfg(test)]
mod testing;
mod video_loop;

pub use controller::{ControllerOptions, SessionController, StartRequest};
pub use disk::DiskEstimate;
pub use engine::{create_engine_channels, RecorderEngine};

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::RecorderError;
use crate::mux::MergeOutcome;

pub type SessionId = Uuid;

/// Poll period of a paused loop
pub(crate) const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Longest single sleep between frames before flags are re-checked
const SLEEP_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Recording,
    Paused,
    Stopping,
    Merging,
    Finalized,
    Failed,
}

impl SessionState {
    /// Capture loops are (or should be) running
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finalized | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
            SessionState::Merging => "merging",
            SessionState::Finalized => "finalized",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State shared between the controller and a session's worker threads
pub struct SessionControl {
    paused: AtomicBool,
    stop_requested: AtomicBool,
    state: Mutex<SessionState>,
    state_changed: Condvar,
    failure: Mutex<Option<RecorderError>>,
    disk: Mutex<Option<DiskEstimate>>,
    warnings: Mutex<Vec<String>>,
    merge: Mutex<Option<MergeOutcome>>,
    started: Instant,
    /// Set once the session stops recording, by stop or by failure
    ended: Mutex<Option<Instant>>,
}

/// Lock even if a worker panicked while holding the guard
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionControl {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            state: Mutex::new(SessionState::Recording),
            state_changed: Condvar::new(),
            failure: Mutex::new(None),
            disk: Mutex::new(None),
            warnings: Mutex::new(Vec::new()),
            merge: Mutex::new(None),
            started: Instant::now(),
            ended: Mutex::new(None),
        }
    }

    /// Wall-clock recording time: keeps running while paused, frozen once
    /// the session is Stopping or Failed
    pub fn elapsed(&self) -> Duration {
        let ended = *lock(&self.ended);
        ended
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.started)
    }

    fn freeze_elapsed(&self) {
        lock(&self.ended).get_or_insert_with(Instant::now);
    }

    /// Sleep for `duration` in short slices, returning early when a stop is
    /// requested or the session is paused. Returns `false` if cut short.
    pub fn sleep_unless_interrupted(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.stop_requested() || self.is_paused() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Move to `to` if the current state is one of `from`.
    /// Returns the current state when the move is not allowed.
    pub fn transition(&self, from: &[SessionState], to: SessionState) -> Result<(), SessionState> {
        let mut state = lock(&self.state);
        if !from.contains(&state) {
            return Err(*state);
        }
        debug!("Session state {} -> {}", *state, to);
        if matches!(to, SessionState::Stopping | SessionState::Failed) {
            self.freeze_elapsed();
        }
        *state = to;
        self.state_changed.notify_all();
        Ok(())
    }

    /// Record a fatal loop error: the session becomes Failed and every loop
    /// is told to stop. Only the first failure is kept; later ones, or ones
    /// arriving after the session already finished, become warnings.
    pub fn fail(&self, err: RecorderError) -> bool {
        let mut state = lock(&self.state);
        let failing = matches!(
            *state,
            SessionState::Recording | SessionState::Paused | SessionState::Stopping
        );
        self.request_stop();

        if !failing {
            warn!("Error after session was {}: {}", *state, err);
            self.add_warning(err.to_string());
            return false;
        }

        error!("Recording failed: {}", err);
        *lock(&self.failure) = Some(err);
        self.freeze_elapsed();
        *state = SessionState::Failed;
        self.state_changed.notify_all();
        true
    }

    /// Block until `done(state)` holds or `timeout` passes; returns the last state seen
    pub fn wait_for(&self, done: impl Fn(SessionState) -> bool, timeout: Duration) -> SessionState {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        while !done(*state) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            state = match self.state_changed.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *state
    }

    pub fn failure_message(&self) -> Option<String> {
        lock(&self.failure).as_ref().map(|e| e.to_string())
    }

    pub fn add_warning(&self, warning: impl Into<String>) {
        lock(&self.warnings).push(warning.into());
    }

    pub fn warnings(&self) -> Vec<String> {
        lock(&self.warnings).clone()
    }

    pub fn publish_disk(&self, estimate: DiskEstimate) {
        *lock(&self.disk) = Some(estimate);
    }

    pub fn disk_estimate(&self) -> Option<DiskEstimate> {
        *lock(&self.disk)
    }

    pub fn set_merge_outcome(&self, outcome: MergeOutcome) {
        *lock(&self.merge) = Some(outcome);
    }

    pub fn merge_outcome(&self) -> Option<MergeOutcome> {
        lock(&self.merge).clone()
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends on drop, so the owner learns the thread finished even if it panicked
struct DoneGuard(mpsc::Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// A capture loop thread that can be joined with a deadline
pub(crate) struct LoopHandle {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
    done_rx: mpsc::Receiver<()>,
}

impl LoopHandle {
    pub(crate) fn spawn<F>(name: &'static str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(format!("{}-capture", name))
            .spawn(move || {
                let _done = DoneGuard(done_tx);
                body();
            })?;

        Ok(Self {
            name,
            handle: Some(handle),
            done_rx,
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Join if the thread finishes within `timeout`. On timeout the thread
    /// is left running and `false` is returned.
    pub(crate) fn join_within(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    error!("{} loop panicked", self.name);
                }
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.handle = Some(handle);
                false
            }
        }
    }
}

/// The live session owned by the controller
pub struct RecordingSession {
    pub id: SessionId,
    pub request: StartRequest,
    pub output_dir: PathBuf,
    pub video_path: PathBuf,
    /// Absent when recording video only
    pub audio_path: Option<PathBuf>,
    pub started_at: chrono::DateTime<chrono::Local>,
    control: std::sync::Arc<SessionControl>,
    video: Option<LoopHandle>,
    audio: Option<LoopHandle>,
    disk: Option<disk::DiskProjector>,
    merge: Option<JoinHandle<()>>,
}

impl RecordingSession {
    pub fn elapsed(&self) -> Duration {
        self.control.elapsed()
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Option<SessionId>,
    pub state: SessionState,
    pub elapsed_seconds: f64,
    pub disk_estimate: Option<DiskEstimate>,
    pub last_error: Option<String>,
    pub warnings: Vec<String>,
}

impl SessionStatus {
    fn idle() -> Self {
        Self {
            session_id: None,
            state: SessionState::Idle,
            elapsed_seconds: 0.0,
            disk_estimate: None,
            last_error: None,
            warnings: Vec::new(),
        }
    }
}

/// Outcome of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub session_id: SessionId,
    pub state: SessionState,
    pub video_path: PathBuf,
    /// Set when audio was recorded but could not be merged into the video
    pub audio_path_if_unmerged: Option<PathBuf>,
    pub merged: bool,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub elapsed_seconds: f64,
}

/// What `stop()` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Finalized,
    /// Merge running in the background
    Merging,
    Failed,
    /// Not recording; nothing changed
    Ignored(SessionState),
}

/// Commands that can be sent to the recorder engine
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start(StartRequest),
    Pause,
    Resume,
    TogglePause,
    Stop,
    /// Stop any session, wait for it to finish and exit
    Shutdown,
}

/// Status updates from the recorder engine
#[derive(Debug, Clone)]
pub enum EngineStatus {
    Idle,
    Recording {
        elapsed_seconds: f64,
        disk: Option<DiskEstimate>,
    },
    Paused {
        elapsed_seconds: f64,
    },
    Stopping,
    Merging,
    /// Session reached Finalized or Failed
    Finished(FinalReport),
    /// Advisory problem; recording continues
    Warning(String),
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_transition_only_from_allowed_states() {
        let control = SessionControl::new();
        assert_eq!(control.state(), SessionState::Recording);
        assert!(control
            .transition(&[SessionState::Recording], SessionState::Paused)
            .is_ok());
        assert_eq!(
            control.transition(&[SessionState::Recording], SessionState::Paused),
            Err(SessionState::Paused)
        );
    }

    #[test]
    fn test_fail_keeps_first_error_and_stops_loops() {
        let control = SessionControl::new();
        assert!(control.fail(RecorderError::CaptureSourceError("display lost".into())));
        assert!(control.stop_requested());
        assert_eq!(control.state(), SessionState::Failed);

        assert!(!control.fail(RecorderError::AudioStreamError("unplugged".into())));
        assert!(control.failure_message().unwrap().contains("display lost"));
        assert_eq!(control.warnings().len(), 1);
    }

    #[test]
    fn test_fail_after_finalize_is_a_warning() {
        let control = SessionControl::new();
        control
            .transition(&[SessionState::Recording], SessionState::Finalized)
            .unwrap();
        assert!(!control.fail(RecorderError::CaptureSourceError("late".into())));
        assert_eq!(control.state(), SessionState::Finalized);
        assert!(control.failure_message().is_none());
    }

    #[test]
    fn test_elapsed_freezes_when_stopping() {
        let control = SessionControl::new();
        thread::sleep(Duration::from_millis(30));
        control
            .transition(&[SessionState::Recording], SessionState::Stopping)
            .unwrap();
        let frozen = control.elapsed();
        assert!(frozen >= Duration::from_millis(30));

        thread::sleep(Duration::from_millis(50));
        control
            .transition(&[SessionState::Stopping], SessionState::Finalized)
            .unwrap();
        assert_eq!(control.elapsed(), frozen);
    }

    #[test]
    fn test_elapsed_freezes_on_failure() {
        let control = SessionControl::new();
        control.fail(RecorderError::CaptureSourceError("display lost".into()));
        let frozen = control.elapsed();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(control.elapsed(), frozen);
    }

    #[test]
    fn test_frame_sleep_is_cut_short_by_stop() {
        let control = Arc::new(SessionControl::new());
        assert!(control.sleep_unless_interrupted(Duration::from_millis(20)));

        let stopper = Arc::clone(&control);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.request_stop();
        });

        let begun = Instant::now();
        assert!(!control.sleep_unless_interrupted(Duration::from_secs(5)));
        assert!(begun.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_frame_sleep_is_cut_short_by_pause() {
        let control = SessionControl::new();
        control.set_paused(true);
        let begun = Instant::now();
        assert!(!control.sleep_unless_interrupted(Duration::from_secs(5)));
        assert!(begun.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_wait_for_wakes_on_transition() {
        let control = Arc::new(SessionControl::new());
        let waiter = Arc::clone(&control);
        let handle = thread::spawn(move || {
            waiter.wait_for(SessionState::is_terminal, Duration::from_secs(5))
        });

        thread::sleep(Duration::from_millis(50));
        control
            .transition(&[SessionState::Recording], SessionState::Finalized)
            .unwrap();
        assert_eq!(handle.join().unwrap(), SessionState::Finalized);
    }

    #[test]
    fn test_loop_handle_join_deadline() {
        let mut quick = LoopHandle::spawn("quick", || {}).unwrap();
        assert!(quick.join_within(Duration::from_secs(5)));
        assert!(quick.join_within(Duration::from_secs(0)));

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut slow = LoopHandle::spawn("slow", move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();
        assert!(!slow.join_within(Duration::from_millis(20)));
        release_tx.send(()).unwrap();
        assert!(slow.join_within(Duration::from_secs(5)));
        assert_eq!(slow.name(), "slow");
    }
}
