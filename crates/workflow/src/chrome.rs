//! Mask-editing overlay contract.

use rdtile_platform_core::{MaskRect, Rect};

/// Overlay the user draws masks on, shown around the capture region.
///
/// Mask rectangles are reported in pixels relative to the capture region
/// passed to [`show_mask_editing`](Self::show_mask_editing).
#[async_trait::async_trait]
pub trait MaskEditingChrome: Send + Sync {
    async fn show_mask_editing(&self, monitor_bounds: Rect, capture_bounds: Rect);

    /// Hide editing affordances so they are not captured.
    async fn enter_recording_mode(&self);

    /// Show editing affordances while the recording is paused.
    async fn enter_pause_edit_mode(&self);

    async fn re_enter_recording_mode(&self);

    /// Masks accumulated so far.
    async fn mask_rects_px(&self) -> Vec<MaskRect>;

    async fn close(&self);

    async fn show_status(&self, message: &str);
}
