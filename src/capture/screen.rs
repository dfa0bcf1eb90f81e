//! Screen grabbing via the `screenshots` crate
//!
//! A [`ScreenFrameSource`] holds native capture handles for every attached
//! display. It is created on the video loop thread and dropped there.

use image::RgbaImage;
use screenshots::Screen;
use serde::Serialize;
use tracing::debug;

use super::target::Region;
use crate::error::{RecorderError, RecorderResult};

/// Pulls one raw image of a screen region on demand
pub trait FrameSource {
    fn grab(&mut self, region: Region) -> RecorderResult<RgbaImage>;
}

/// An attached display
#[derive(Debug, Clone, Serialize)]
pub struct MonitorInfo {
    pub index: usize,
    pub name: String,
    pub primary: bool,
    pub region: Region,
}

/// List attached displays in the order the platform reports them
pub fn list_monitors() -> RecorderResult<Vec<MonitorInfo>> {
    let screens = Screen::all().map_err(|e| RecorderError::CaptureSourceError(e.to_string()))?;

    Ok(screens
        .iter()
        .enumerate()
        .map(|(index, screen)| MonitorInfo {
            index,
            name: format!("Display {}", screen.display_info.id),
            primary: screen.display_info.is_primary,
            region: screen_region(screen),
        })
        .collect())
}

/// Pick a monitor by index, or the primary one when no index is given
pub fn select_monitor(index: Option<usize>) -> RecorderResult<MonitorInfo> {
    let monitors = list_monitors()?;
    let found = match index {
        Some(i) => monitors.into_iter().find(|m| m.index == i),
        None => {
            let primary = monitors.iter().position(|m| m.primary).unwrap_or(0);
            monitors.into_iter().nth(primary)
        }
    };
    found.ok_or_else(|| match index {
        Some(i) => RecorderError::TargetGone(format!("monitor {}", i)),
        None => RecorderError::TargetGone("no monitors attached".to_string()),
    })
}

fn screen_region(screen: &Screen) -> Region {
    let info = &screen.display_info;
    Region::new(info.y, info.x, info.width as i32, info.height as i32)
}

/// Frame source backed by the platform screen capture API
pub struct ScreenFrameSource {
    screens: Vec<Screen>,
}

impl ScreenFrameSource {
    pub fn open() -> RecorderResult<Self> {
        let screens = Screen::all().map_err(|e| RecorderError::CaptureSourceError(e.to_string()))?;
        if screens.is_empty() {
            return Err(RecorderError::CaptureSourceError(
                "no displays found".to_string(),
            ));
        }
        debug!("Screen capture opened with {} display(s)", screens.len());
        Ok(Self { screens })
    }

    /// The display containing the region's top-left corner
    fn screen_for(&self, region: &Region) -> Option<&Screen> {
        self.screens
            .iter()
            .find(|s| screen_region(s).contains_point(region.left, region.top))
    }
}

impl FrameSource for ScreenFrameSource {
    fn grab(&mut self, region: Region) -> RecorderResult<RgbaImage> {
        let screen = self.screen_for(&region).ok_or_else(|| {
            RecorderError::CaptureSourceError(format!("region {} is not on any display", region))
        })?;
        let origin = screen_region(screen);

        let captured = screen
            .capture_area(
                region.left - origin.left,
                region.top - origin.top,
                region.width_px(),
                region.height_px(),
            )
            .map_err(|e| RecorderError::CaptureSourceError(e.to_string()))?;

        let (width, height) = (captured.width(), captured.height());
        RgbaImage::from_raw(width, height, captured.into_raw()).ok_or_else(|| {
            RecorderError::CaptureSourceError(format!(
                "captured buffer does not match {}x{}",
                width, height
            ))
        })
    }
}
