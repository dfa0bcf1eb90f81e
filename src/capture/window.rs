//! Window enumeration and live window rectangles
//!
//! Native on Windows. Other platforms report no windows and cannot resolve
//! window targets.

use serde::Serialize;

use super::target::{Region, WindowLocator};
use crate::error::{RecorderError, RecorderResult};

/// A top-level window that can be recorded
#[derive(Debug, Clone, Serialize)]
pub struct WindowInfo {
    pub handle: u64,
    pub title: String,
    pub region: Region,
}

/// List visible, titled top-level windows
pub fn list_windows() -> Vec<WindowInfo> {
    platform::list_windows()
}

/// Window locator backed by the native window manager
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWindowLocator;

impl WindowLocator for SystemWindowLocator {
    fn window_rect(&self, handle: u64) -> RecorderResult<Region> {
        platform::window_rect(handle)
            .ok_or_else(|| RecorderError::TargetGone(format!("window {:#x}", handle)))
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(target_os = "windows")]
mod platform {
    use super::{Region, WindowInfo};
    use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowRect, GetWindowTextW, IsWindow, IsWindowVisible,
    };

    fn to_hwnd(handle: u64) -> HWND {
        HWND(handle as usize as *mut std::ffi::c_void)
    }

    pub fn window_rect(handle: u64) -> Option<Region> {
        let hwnd = to_hwnd(handle);
        unsafe {
            if !IsWindow(hwnd).as_bool() {
                return None;
            }
            let mut rect = RECT::default();
            GetWindowRect(hwnd, &mut rect).ok()?;
            Some(Region::new(
                rect.top,
                rect.left,
                rect.right - rect.left,
                rect.bottom - rect.top,
            ))
        }
    }

    unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let windows = &mut *(lparam.0 as *mut Vec<WindowInfo>);

        if IsWindowVisible(hwnd).as_bool() {
            let mut title = [0u16; 512];
            let len = GetWindowTextW(hwnd, &mut title);
            if len > 0 {
                let handle = hwnd.0 as usize as u64;
                if let Some(region) = window_rect(handle).filter(|r| r.is_valid()) {
                    windows.push(WindowInfo {
                        handle,
                        title: String::from_utf16_lossy(&title[..len as usize]),
                        region,
                    });
                }
            }
        }

        BOOL(1)
    }

    pub fn list_windows() -> Vec<WindowInfo> {
        let mut windows: Vec<WindowInfo> = Vec::new();
        unsafe {
            let _ = EnumWindows(
                Some(collect_window),
                LPARAM(&mut windows as *mut Vec<WindowInfo> as isize),
            );
        }
        windows.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
        windows
    }
}

// ============================================================================
// Fallback
// ============================================================================

#[cfg(not(target_os = "windows"))]
mod platform {
    use super::{Region, WindowInfo};

    pub fn window_rect(_handle: u64) -> Option<Region> {
        None
    }

    pub fn list_windows() -> Vec<WindowInfo> {
        Vec::new()
    }
}
