//! Disk space projection while recording

use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::SessionControl;
use crate::backend::RecordingBackend;
use crate::video::VideoSpec;

/// How long the remaining disk space lasts at the uncompressed frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskEstimate {
    pub free_bytes: u64,
    pub bytes_per_second_estimate: u64,
    pub seconds_remaining: u64,
    pub urgent: bool,
}

impl DiskEstimate {
    /// Worst case: every frame stored as raw 24-bit pixels
    pub fn project(free_bytes: u64, width: u32, height: u32, fps: u32, urgent_below_secs: u64) -> Self {
        let bytes_per_second_estimate = width as u64 * height as u64 * 3 * fps as u64;
        let seconds_remaining = free_bytes
            .checked_div(bytes_per_second_estimate)
            .unwrap_or(u64::MAX);

        Self {
            free_bytes,
            bytes_per_second_estimate,
            seconds_remaining,
            urgent: seconds_remaining < urgent_below_secs,
        }
    }

    /// `m:ss`
    pub fn remaining_display(&self) -> String {
        format!("{}:{:02}", self.seconds_remaining / 60, self.seconds_remaining % 60)
    }
}

/// Background thread refreshing the session's [`DiskEstimate`]
pub(crate) struct DiskProjector {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DiskProjector {
    pub(crate) fn spawn(
        backend: Arc<dyn RecordingBackend>,
        control: Arc<SessionControl>,
        output_dir: PathBuf,
        spec: VideoSpec,
        interval: Duration,
        urgent_below_secs: u64,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("disk-projector".into())
            .spawn(move || loop {
                if !control.state().is_active() {
                    break;
                }

                match backend.available_bytes(&output_dir) {
                    Ok(Some(free)) => {
                        let estimate = DiskEstimate::project(
                            free,
                            spec.width,
                            spec.height,
                            spec.fps.get(),
                            urgent_below_secs,
                        );
                        if estimate.urgent {
                            warn!(
                                "Disk almost full: about {} of recording left in {:?}",
                                estimate.remaining_display(),
                                output_dir
                            );
                        } else {
                            debug!("Disk estimate: {} remaining", estimate.remaining_display());
                        }
                        control.publish_disk(estimate);
                    }
                    Ok(None) => debug!("Free space unknown for {:?}", output_dir),
                    Err(e) => warn!("Failed to read free space for {:?}: {}", output_dir, e),
                }

                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) {
        // Disconnecting wakes the thread immediately
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DiskProjector {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_hd_with_little_space_is_urgent() {
        let estimate = DiskEstimate::project(100 * 1024 * 1024, 1920, 1080, 30, 300);
        assert_eq!(estimate.bytes_per_second_estimate, 186_624_000);
        assert_eq!(estimate.seconds_remaining, 0);
        assert!(estimate.urgent);
    }

    #[test]
    fn test_plenty_of_space_is_not_urgent() {
        // One hour of 1280x720@30
        let bps = 1280u64 * 720 * 3 * 30;
        let estimate = DiskEstimate::project(bps * 3600, 1280, 720, 30, 300);
        assert_eq!(estimate.seconds_remaining, 3600);
        assert!(!estimate.urgent);
        assert_eq!(estimate.remaining_display(), "60:00");
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let bps = 100u64 * 100 * 3 * 30;
        assert!(!DiskEstimate::project(bps * 300, 100, 100, 30, 300).urgent);
        assert!(DiskEstimate::project(bps * 299, 100, 100, 30, 300).urgent);
    }
}
