//! Screen capture
//!
//! Capture targets (monitor or window), region resolution, and the frame
//! source that grabs raw images from the screen.

mod screen;
mod target;
mod window;

pub use screen::{list_monitors, select_monitor, FrameSource, MonitorInfo, ScreenFrameSource};
pub use target::{CaptureTarget, Region, RegionResolver, TargetKind, WindowLocator};
pub use window::{list_windows, SystemWindowLocator, WindowInfo};
