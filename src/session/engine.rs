//! Recorder engine
//!
//! Async front for the [`SessionController`]. Receives [`EngineCommand`]s,
//! polls session status once per second, enforces the optional maximum
//! duration and broadcasts [`EngineStatus`] updates. Controller calls block
//! (stop joins the capture loops), so they run inside `block_in_place`;
//! the engine needs a multi-threaded runtime.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{
    EngineCommand, EngineStatus, SessionController, SessionState, StartRequest, StopOutcome,
};

/// How long shutdown waits for a running merge
const SHUTDOWN_MERGE_WAIT: Duration = Duration::from_secs(120);

pub struct RecorderEngine {
    controller: SessionController,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    status_tx: broadcast::Sender<EngineStatus>,
    /// Auto-stop after this long
    max_duration: Option<Duration>,
    tick_interval: Duration,
    /// Session warnings already broadcast
    warnings_sent: usize,
}

impl RecorderEngine {
    pub fn new(
        controller: SessionController,
        cmd_rx: mpsc::Receiver<EngineCommand>,
        status_tx: broadcast::Sender<EngineStatus>,
        max_duration: Option<Duration>,
    ) -> Self {
        Self {
            controller,
            cmd_rx,
            status_tx,
            max_duration,
            tick_interval: Duration::from_secs(1),
            warnings_sent: 0,
        }
    }

    #[cfg(test)]
    fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Run until `Shutdown` or until every command sender is gone
    pub async fn run(&mut self) -> Result<()> {
        info!("Recorder engine starting");
        let mut status_timer = tokio::time::interval(self.tick_interval);
        let mut deadline: Option<Instant> = None;

        let _ = self.status_tx.send(EngineStatus::Idle);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        info!("Command channel closed");
                        self.shutdown();
                        break;
                    };
                    match cmd {
                        EngineCommand::Start(request) => {
                            if self.start(request) {
                                deadline = self.max_duration.map(|d| Instant::now() + d);
                            }
                        }
                        EngineCommand::Pause => self.pause(),
                        EngineCommand::Resume => self.resume(),
                        EngineCommand::TogglePause => match self.controller.state() {
                            SessionState::Paused => self.resume(),
                            _ => self.pause(),
                        },
                        EngineCommand::Stop => {
                            deadline = None;
                            self.stop();
                        }
                        EngineCommand::Shutdown => {
                            info!("Shutdown command received");
                            self.shutdown();
                            break;
                        }
                    }
                }

                _ = status_timer.tick() => {
                    self.publish_status();
                }

                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    info!("Maximum recording duration reached, stopping");
                    deadline = None;
                    self.stop();
                }
            }
        }

        info!("Recorder engine stopped");
        Ok(())
    }

    fn start(&mut self, request: StartRequest) -> bool {
        self.warnings_sent = 0;
        match tokio::task::block_in_place(|| self.controller.start(request)) {
            Ok(id) => {
                info!("Session {} recording", id);
                self.publish_status();
                true
            }
            Err(e) => {
                error!("Failed to start recording: {}", e);
                let _ = self.status_tx.send(EngineStatus::Error(e.to_string()));
                false
            }
        }
    }

    fn pause(&mut self) {
        match self.controller.pause() {
            Ok(()) => self.publish_status(),
            Err(e) => self.advise(e.to_string()),
        }
    }

    fn resume(&mut self) {
        match self.controller.resume() {
            Ok(()) => self.publish_status(),
            Err(e) => self.advise(e.to_string()),
        }
    }

    fn stop(&mut self) {
        let outcome = tokio::task::block_in_place(|| self.controller.stop());
        debug!("Stop outcome: {:?}", outcome);
        if let StopOutcome::Ignored(state) = outcome {
            if state == SessionState::Idle {
                self.advise("not recording".to_string());
            }
        }
        self.publish_status();
    }

    /// Stop any session and wait for it to settle so its report is published
    fn shutdown(&mut self) {
        if self.controller.state() == SessionState::Idle {
            return;
        }
        tokio::task::block_in_place(|| {
            self.controller.stop();
            self.controller.wait_for_terminal(SHUTDOWN_MERGE_WAIT)
        });
        self.publish_status();
    }

    fn advise(&self, message: String) {
        warn!("{}", message);
        let _ = self.status_tx.send(EngineStatus::Warning(message));
    }

    fn publish_status(&mut self) {
        let status = self.controller.status();

        for warning in status.warnings.iter().skip(self.warnings_sent) {
            let _ = self.status_tx.send(EngineStatus::Warning(warning.clone()));
        }
        self.warnings_sent = self.warnings_sent.max(status.warnings.len());

        let update = match status.state {
            SessionState::Idle => return,
            SessionState::Recording => EngineStatus::Recording {
                elapsed_seconds: status.elapsed_seconds,
                disk: status.disk_estimate,
            },
            SessionState::Paused => EngineStatus::Paused {
                elapsed_seconds: status.elapsed_seconds,
            },
            SessionState::Stopping => EngineStatus::Stopping,
            SessionState::Merging => EngineStatus::Merging,
            SessionState::Finalized | SessionState::Failed => {
                match tokio::task::block_in_place(|| self.controller.finalize_outcome()) {
                    Some(report) => {
                        if let Some(error) = &report.error {
                            let _ = self.status_tx.send(EngineStatus::Error(error.clone()));
                        }
                        self.warnings_sent = 0;
                        EngineStatus::Finished(report)
                    }
                    None => return,
                }
            }
        };
        let _ = self.status_tx.send(update);
    }
}

/// Create command and status channels for the engine
pub fn create_engine_channels() -> (
    mpsc::Sender<EngineCommand>,
    mpsc::Receiver<EngineCommand>,
    broadcast::Sender<EngineStatus>,
    broadcast::Receiver<EngineStatus>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (status_tx, status_rx) = broadcast::channel(64);
    (cmd_tx, cmd_rx, status_tx, status_rx)
}

#[cfg(test)]
mod tests {
    use super::super::testing::FakeBackend;
    use super::super::{ControllerOptions, FinalReport};
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::capture::{CaptureTarget, Region};
    use crate::mux::tests::StubRunner;
    use crate::mux::Muxer;
    use crate::video::{Container, FrameRate};
    use std::sync::Arc;

    fn engine_in(
        dir: &std::path::Path,
        max_duration: Option<Duration>,
    ) -> (
        RecorderEngine,
        mpsc::Sender<EngineCommand>,
        broadcast::Receiver<EngineStatus>,
    ) {
        let backend: Arc<dyn RecordingBackend> = Arc::new(FakeBackend::new());
        let controller = SessionController::new(
            backend,
            Muxer::new(Arc::new(StubRunner::new(true))),
            ControllerOptions {
                output_dir: dir.to_path_buf(),
                ..ControllerOptions::default()
            },
        );
        let (cmd_tx, cmd_rx, status_tx, status_rx) = create_engine_channels();
        let engine = RecorderEngine::new(controller, cmd_rx, status_tx, max_duration)
            .with_tick_interval(Duration::from_millis(50));
        (engine, cmd_tx, status_rx)
    }

    fn request(audio: bool) -> StartRequest {
        StartRequest {
            target: CaptureTarget::monitor(0, Region::new(0, 0, 1920, 1080)),
            fps: FrameRate::try_from(30).unwrap(),
            container: Container::Mp4,
            audio_device: audio.then(|| FakeBackend::DEVICE.to_string()),
        }
    }

    async fn next_report(rx: &mut broadcast::Receiver<EngineStatus>) -> FinalReport {
        loop {
            match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
                Ok(Ok(EngineStatus::Finished(report))) => return report,
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                other => panic!("no final report: {:?}", other.map(|r| r.is_ok())),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_pause_stop_reports_merge() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, cmd_tx, mut status_rx) = engine_in(dir.path(), None);
        let runner = tokio::spawn(async move { engine.run().await });

        cmd_tx.send(EngineCommand::Start(request(true))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        cmd_tx.send(EngineCommand::TogglePause).await.unwrap();
        cmd_tx.send(EngineCommand::TogglePause).await.unwrap();
        cmd_tx.send(EngineCommand::Stop).await.unwrap();

        let report = next_report(&mut status_rx).await;
        assert_eq!(report.state, SessionState::Finalized);
        assert!(report.merged);

        cmd_tx.send(EngineCommand::Shutdown).await.unwrap();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_max_duration_auto_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, cmd_tx, mut status_rx) =
            engine_in(dir.path(), Some(Duration::from_millis(300)));
        let runner = tokio::spawn(async move { engine.run().await });

        cmd_tx.send(EngineCommand::Start(request(false))).await.unwrap();
        let report = next_report(&mut status_rx).await;
        assert_eq!(report.state, SessionState::Finalized);
        assert!(report.video_path.exists());

        drop(cmd_tx);
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_finishes_running_session() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, cmd_tx, mut status_rx) = engine_in(dir.path(), None);
        let runner = tokio::spawn(async move { engine.run().await });

        cmd_tx.send(EngineCommand::Start(request(false))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cmd_tx.send(EngineCommand::Shutdown).await.unwrap();

        let report = next_report(&mut status_rx).await;
        assert_eq!(report.state, SessionState::Finalized);
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_start_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, cmd_tx, mut status_rx) = engine_in(dir.path(), None);
        let runner = tokio::spawn(async move { engine.run().await });

        let mut bad = request(false);
        bad.target = CaptureTarget::monitor(0, Region::new(0, 0, 0, 0));
        cmd_tx.send(EngineCommand::Start(bad)).await.unwrap();

        let error = loop {
            match tokio::time::timeout(Duration::from_secs(5), status_rx.recv()).await {
                Ok(Ok(EngineStatus::Error(e))) => break e,
                Ok(Ok(_)) => continue,
                other => panic!("no error status: {:?}", other.map(|r| r.is_ok())),
            }
        };
        assert!(error.contains("invalid capture region"));

        cmd_tx.send(EngineCommand::Shutdown).await.unwrap();
        runner.await.unwrap().unwrap();
    }
}
