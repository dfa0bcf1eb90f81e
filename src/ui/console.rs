//! Terminal front-end
//!
//! Prints engine status to stdout and turns single-letter commands read
//! from stdin into [`EngineCommand`]s.

use anyhow::Result;
use std::io::{BufRead, Write};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::session::{EngineCommand, EngineStatus, FinalReport, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleInput {
    TogglePause,
    Stop,
    Quit,
    Help,
}

fn parse_input(line: &str) -> Option<ConsoleInput> {
    match line.trim().to_ascii_lowercase().as_str() {
        "p" | "pause" | "r" | "resume" => Some(ConsoleInput::TogglePause),
        "s" | "stop" => Some(ConsoleInput::Stop),
        "q" | "quit" | "exit" => Some(ConsoleInput::Quit),
        "h" | "?" | "help" => Some(ConsoleInput::Help),
        _ => None,
    }
}

pub struct ConsoleApp {
    cmd_tx: mpsc::Sender<EngineCommand>,
    status_rx: broadcast::Receiver<EngineStatus>,
    /// Set once the engine reported a running session
    session_seen: bool,
    last_line: Option<String>,
}

impl ConsoleApp {
    pub fn new(
        cmd_tx: mpsc::Sender<EngineCommand>,
        status_rx: broadcast::Receiver<EngineStatus>,
    ) -> Self {
        Self {
            cmd_tx,
            status_rx,
            session_seen: false,
            last_line: None,
        }
    }

    /// Run until the session's final report arrives or the engine goes away.
    /// Returns the report, if any.
    pub fn run(mut self) -> Result<Option<FinalReport>> {
        let input_rx = spawn_stdin_reader();
        print_commands();

        loop {
            match self.status_rx.try_recv() {
                Ok(EngineStatus::Finished(report)) => {
                    println!();
                    println!("{}", summary(&report));
                    return Ok(Some(report));
                }
                Ok(EngineStatus::Error(message)) if !self.session_seen => {
                    println!("Could not start recording: {}", message);
                    return Ok(None);
                }
                Ok(status) => self.show(&status),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Missed {} status updates", n);
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
                Err(broadcast::error::TryRecvError::Closed) => {
                    info!("Status channel closed, exiting console");
                    return Ok(None);
                }
            }

            while let Ok(input) = input_rx.try_recv() {
                self.handle_input(input);
            }

            thread::sleep(Duration::from_millis(50));
        }
    }

    fn handle_input(&mut self, input: ConsoleInput) {
        let command = match input {
            ConsoleInput::TogglePause => EngineCommand::TogglePause,
            ConsoleInput::Stop => EngineCommand::Stop,
            ConsoleInput::Quit => EngineCommand::Shutdown,
            ConsoleInput::Help => {
                print_commands();
                return;
            }
        };
        debug!("Console command: {:?}", command);
        // try_send: this thread is not inside the runtime
        if let Err(e) = self.cmd_tx.try_send(command) {
            warn!("Failed to send console command: {}", e);
        }
    }

    fn show(&mut self, status: &EngineStatus) {
        if matches!(
            status,
            EngineStatus::Recording { .. } | EngineStatus::Paused { .. }
        ) {
            self.session_seen = true;
        }
        let Some(line) = status_line(status) else {
            return;
        };
        if self.last_line.as_deref() == Some(line.as_str()) {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", line);
        let _ = stdout.flush();
        self.last_line = Some(line);
    }
}

fn spawn_stdin_reader() -> std_mpsc::Receiver<ConsoleInput> {
    let (tx, rx) = std_mpsc::channel();
    let spawned = thread::Builder::new()
        .name("console-input".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines().map_while(|line| line.ok()) {
                match parse_input(&line) {
                    Some(input) => {
                        if tx.send(input).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => println!("Unknown command '{}' (h for help)", line.trim()),
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Console input unavailable: {}", e);
    }
    rx
}

fn print_commands() {
    println!("Commands: [p] pause/resume  [s] stop  [q] quit  [h] help");
}

fn clock(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

fn status_line(status: &EngineStatus) -> Option<String> {
    let line = match status {
        EngineStatus::Idle => return None,
        EngineStatus::Recording {
            elapsed_seconds,
            disk,
        } => {
            let mut line = format!("● REC {}", clock(*elapsed_seconds));
            if let Some(disk) = disk {
                if disk.urgent {
                    line.push_str(&format!("  ⚠ disk full in {}", disk.remaining_display()));
                } else {
                    line.push_str(&format!("  disk: {} left", disk.remaining_display()));
                }
            }
            line
        }
        EngineStatus::Paused { elapsed_seconds } => {
            format!("❚❚ PAUSED {}", clock(*elapsed_seconds))
        }
        EngineStatus::Stopping => "Stopping...".to_string(),
        EngineStatus::Merging => "Merging video and audio...".to_string(),
        EngineStatus::Finished(report) => summary(report),
        EngineStatus::Warning(message) => format!("warning: {}", message),
        EngineStatus::Error(message) => format!("error: {}", message),
    };
    Some(line)
}

/// Final summary: one merged file, or video plus a separate audio file
fn summary(report: &FinalReport) -> String {
    let mut out = Vec::new();
    let duration = clock(report.elapsed_seconds);

    match (report.state, report.merged, &report.audio_path_if_unmerged) {
        (SessionState::Failed, _, _) => {
            out.push(format!("Recording failed after {}.", duration));
            if let Some(error) = &report.error {
                out.push(format!("  reason: {}", error));
            }
            out.push(format!("  partial video: {}", report.video_path.display()));
            if let Some(audio) = &report.audio_path_if_unmerged {
                out.push(format!("  partial audio: {}", audio.display()));
            }
        }
        (_, true, _) => {
            out.push(format!("Recording saved ({}), video with audio:", duration));
            out.push(format!("  {}", report.video_path.display()));
        }
        (_, false, Some(audio)) => {
            out.push(format!(
                "Recording saved ({}), audio could not be merged:",
                duration
            ));
            out.push(format!("  video: {}", report.video_path.display()));
            out.push(format!("  audio: {}", audio.display()));
        }
        (_, false, None) => {
            out.push(format!("Recording saved ({}):", duration));
            out.push(format!("  {}", report.video_path.display()));
        }
    }

    for warning in &report.warnings {
        out.push(format!("  warning: {}", warning));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DiskEstimate;
    use std::path::PathBuf;

    fn report(merged: bool, audio: Option<&str>, state: SessionState) -> FinalReport {
        FinalReport {
            session_id: uuid::Uuid::new_v4(),
            state,
            video_path: PathBuf::from("/videos/video_20240101_120000.mp4"),
            audio_path_if_unmerged: audio.map(PathBuf::from),
            merged,
            warnings: Vec::new(),
            error: None,
            elapsed_seconds: 75.4,
        }
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input(" P "), Some(ConsoleInput::TogglePause));
        assert_eq!(parse_input("stop"), Some(ConsoleInput::Stop));
        assert_eq!(parse_input("q"), Some(ConsoleInput::Quit));
        assert_eq!(parse_input("record"), None);
    }

    #[test]
    fn test_summary_distinguishes_merged_and_separate_files() {
        let merged = summary(&report(true, None, SessionState::Finalized));
        assert!(merged.contains("video with audio"));
        assert!(merged.contains("00:01:15"));

        let separate = summary(&report(
            false,
            Some("/videos/audio_20240101_120000.wav"),
            SessionState::Finalized,
        ));
        assert!(separate.contains("could not be merged"));
        assert!(separate.contains("audio: /videos/audio_20240101_120000.wav"));

        let mut failed = report(false, None, SessionState::Failed);
        failed.error = Some("screen capture failed: display lost".to_string());
        let failed = summary(&failed);
        assert!(failed.starts_with("Recording failed"));
        assert!(failed.contains("display lost"));
    }

    #[test]
    fn test_status_line_flags_urgent_disk() {
        let disk = DiskEstimate::project(100 * 1024 * 1024, 1920, 1080, 30, 300);
        let line = status_line(&EngineStatus::Recording {
            elapsed_seconds: 3.0,
            disk: Some(disk),
        })
        .unwrap();
        assert!(line.contains("00:00:03"));
        assert!(line.contains("disk full in 0:00"));
        assert_eq!(status_line(&EngineStatus::Idle), None);
    }
}
