//! Window collaborator contracts.

use std::fmt;

use image::RgbaImage;
use rdtile_common::error::RdtileResult;
use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

/// Opaque native window identifier. Zero means "no window".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

impl WindowHandle {
    pub const NONE: WindowHandle = WindowHandle(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A window the host considers eligible for recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub title: String,
    /// Monotonic sequence number of the last time the host maximized this
    /// window; `None` if it never was.
    pub last_maximized_seq: Option<u64>,
}

/// Pick the least-recently-maximized window from the host's candidates.
///
/// Windows that were never maximized rank first; ties keep list order.
pub fn select_capture_candidate(candidates: &[WindowInfo]) -> Option<WindowHandle> {
    candidates
        .iter()
        .filter(|w| !w.handle.is_none())
        .min_by_key(|w| w.last_maximized_seq.map_or(0, |seq| seq.saturating_add(1)))
        .map(|w| w.handle)
}

/// Window query service provided by the host application.
///
/// Empty rectangles signal "unavailable".
#[async_trait::async_trait]
pub trait WindowService: Send + Sync {
    /// Windows eligible for auto-selection, in the host's list order.
    async fn capture_candidates(&self) -> RdtileResult<Vec<WindowInfo>>;

    /// Client area of the window in screen coordinates.
    async fn client_area_screen_bounds(&self, window: WindowHandle) -> RdtileResult<Rect>;

    /// Bounds of the monitor containing the window.
    async fn monitor_bounds_for_window(&self, window: WindowHandle) -> RdtileResult<Rect>;

    /// Outer window bounds in screen coordinates.
    async fn window_bounds(&self, window: WindowHandle) -> RdtileResult<Rect>;

    /// Bounds of the whole virtual desktop.
    async fn virtual_desktop_bounds(&self) -> RdtileResult<Rect>;
}

/// Grabs the current bitmap of a window's surface.
///
/// Called from a blocking worker; implementations may take a few
/// milliseconds per frame.
pub trait WindowCapturer: Send + Sync {
    fn capture(&self, window: WindowHandle) -> RdtileResult<RgbaImage>;
}
