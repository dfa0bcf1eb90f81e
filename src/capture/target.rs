//! Capture targets and region resolution
//!
//! A target is either a monitor (fixed region for the whole session) or a
//! window (region re-queried from its handle on every sample). The choice is
//! made once, when the target is selected, by building a [`RegionResolver`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::error::{RecorderError, RecorderResult};

/// Screen rectangle in virtual-desktop coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub top: i32,
    pub left: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(top: i32, left: i32, width: i32, height: i32) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    /// Both dimensions strictly positive
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn width_px(&self) -> u32 {
        self.width.max(0) as u32
    }

    pub fn height_px(&self) -> u32 {
        self.height.max(0) as u32
    }

    pub fn with_size(self, width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            ..self
        }
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.left + self.width && y >= self.top && y < self.top + self.height
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.left, self.top
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Monitor,
    Window,
}

/// What a session records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTarget {
    pub kind: TargetKind,
    pub region: Region,
    /// Monitor index or native window handle
    pub handle: u64,
}

impl CaptureTarget {
    pub fn monitor(index: usize, region: Region) -> Self {
        Self {
            kind: TargetKind::Monitor,
            region,
            handle: index as u64,
        }
    }

    pub fn window(handle: u64, region: Region) -> Self {
        Self {
            kind: TargetKind::Window,
            region,
            handle,
        }
    }

    /// Zero or negative dimensions are a fatal precondition failure.
    pub fn validate(&self) -> RecorderResult<()> {
        if self.region.is_valid() {
            Ok(())
        } else {
            Err(RecorderError::InvalidRegion(self.region))
        }
    }
}

/// Looks up the current on-screen rectangle of a window
pub trait WindowLocator: Send + Sync {
    fn window_rect(&self, handle: u64) -> RecorderResult<Region>;
}

/// Produces the region to sample for each frame.
///
/// Window targets keep the size they had when the session started: the
/// resolved region follows the window around the screen, but its width and
/// height stay pinned so every frame matches the encoder's dimensions.
pub enum RegionResolver {
    Fixed(Region),
    Window {
        handle: u64,
        pinned_width: i32,
        pinned_height: i32,
        locator: Arc<dyn WindowLocator>,
        resize_reported: bool,
    },
}

impl RegionResolver {
    pub fn for_target(target: &CaptureTarget, locator: Arc<dyn WindowLocator>) -> Self {
        match target.kind {
            TargetKind::Monitor => RegionResolver::Fixed(target.region),
            TargetKind::Window => RegionResolver::Window {
                handle: target.handle,
                pinned_width: target.region.width,
                pinned_height: target.region.height,
                locator,
                resize_reported: false,
            },
        }
    }

    pub fn resolve(&mut self) -> RecorderResult<Region> {
        match self {
            RegionResolver::Fixed(region) => Ok(*region),
            RegionResolver::Window {
                handle,
                pinned_width,
                pinned_height,
                locator,
                resize_reported,
            } => {
                let live = locator.window_rect(*handle)?;
                if (live.width != *pinned_width || live.height != *pinned_height) && !*resize_reported {
                    warn!(
                        "Window {} resized to {}x{}; recording keeps the original {}x{} area",
                        handle, live.width, live.height, pinned_width, pinned_height
                    );
                    *resize_reported = true;
                }
                Ok(live.with_size(*pinned_width, *pinned_height))
            }
        }
    }
}

impl fmt::Debug for RegionResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionResolver::Fixed(region) => f.debug_tuple("Fixed").field(region).finish(),
            RegionResolver::Window {
                handle,
                pinned_width,
                pinned_height,
                ..
            } => f
                .debug_struct("Window")
                .field("handle", handle)
                .field("pinned_width", pinned_width)
                .field("pinned_height", pinned_height)
                .finish(),
        }
    }
}
