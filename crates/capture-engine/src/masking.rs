//! Privacy masking post-pass.
//!
//! Masks arrive relative to the *requested* capture region. The encoded
//! frame may start at a different origin (clipping against the desktop or
//! the window surface), so each mask is shifted by that offset, clamped to
//! the frame, and drawn as an opaque box during a re-encode.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rdtile_common::error::{RdtileError, RdtileResult};
use rdtile_platform_core::{MaskRect, Rect};

use crate::encoder_args::mask_args;
use crate::process::{encoder_command, remove_file_logged, run_to_completion};
use crate::session::{FinishedRecording, MaskingOutcome};

/// Upper bound for the masking re-encode.
pub const MASK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Geometry of the encoded frame relative to the requested region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaskFrame {
    /// Encoded width in pixels.
    pub width: i32,
    /// Encoded height in pixels.
    pub height: i32,
    /// Requested origin minus encoded origin, added to every mask.
    pub origin_offset: (i32, i32),
}

impl MaskFrame {
    /// Frame for a capture that encoded `actual` out of `requested`.
    ///
    /// Both rectangles must share a coordinate space.
    pub fn new(requested: Rect, actual: Rect) -> Self {
        Self {
            width: actual.width,
            height: actual.height,
            origin_offset: (
                requested.x.saturating_sub(actual.x),
                requested.y.saturating_sub(actual.y),
            ),
        }
    }
}

/// Shift masks into frame coordinates and clamp them to the frame.
///
/// Masks that miss the frame or end up with zero area are dropped.
pub fn resolve_mask_rects(masks: &[MaskRect], frame: &MaskFrame) -> Vec<Rect> {
    let bounds = Rect::new(0, 0, frame.width, frame.height);
    let (dx, dy) = frame.origin_offset;
    masks
        .iter()
        .filter(|mask| !mask.is_empty())
        .filter_map(|mask| mask.translate(dx, dy).intersect(&bounds))
        .collect()
}

/// One opaque `drawbox` directive per rectangle, comma-joined.
///
/// `None` when there is nothing to draw.
pub fn drawbox_filter(rects: &[Rect]) -> Option<String> {
    if rects.is_empty() {
        return None;
    }
    Some(
        rects
            .iter()
            .map(|r| {
                format!(
                    "drawbox=x={}:y={}:w={}:h={}:color=black@1:t=fill",
                    r.x, r.y, r.width, r.height
                )
            })
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Result of one masking pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskPass {
    /// No mask overlapped the frame; the input was left untouched.
    Skipped,
    /// `output` now holds the masked video.
    Applied { regions: usize },
    /// The re-encode failed; `output` was not written.
    Failed { reason: String },
}

/// Re-encode `input` into `output` with `masks` drawn over it.
///
/// The encode goes to a temporary sibling of `output` that replaces it
/// only after the encoder succeeded. `input` is never modified.
pub async fn apply_masks(
    encoder: &Path,
    input: &Path,
    output: &Path,
    frame: &MaskFrame,
    masks: &[MaskRect],
) -> MaskPass {
    let rects = resolve_mask_rects(masks, frame);
    let Some(filter) = drawbox_filter(&rects) else {
        tracing::info!(
            requested = masks.len(),
            frame_width = frame.width,
            frame_height = frame.height,
            "No mask overlaps the recorded frame; skipping masking pass"
        );
        return MaskPass::Skipped;
    };

    let temp = masking_temp_path(output);
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        regions = rects.len(),
        "Applying masks"
    );

    let mut command = encoder_command(encoder);
    command.args(mask_args(input, &filter, &temp));

    let failure = match run_to_completion("masking", command, MASK_TIMEOUT).await {
        Ok(status) if status.success() && temp.exists() => {
            match tokio::fs::rename(&temp, output).await {
                Ok(()) => {
                    return MaskPass::Applied {
                        regions: rects.len(),
                    }
                }
                Err(e) => RdtileError::masking(format!(
                    "failed to move masked output into place: {e}"
                )),
            }
        }
        Ok(status) => RdtileError::masking(format!("encoder exited with {status}")),
        Err(e) => RdtileError::masking(e.to_string()),
    };

    remove_file_logged(&temp).await;
    tracing::warn!(error = %failure, "Masking failed");
    MaskPass::Failed {
        reason: failure.to_string(),
    }
}

fn masking_temp_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    output.with_file_name(format!("{stem}.masking.mp4"))
}

/// Publish `input` as the finished recording, masking it when asked.
///
/// - No masks: `input` is renamed to `final_path`.
/// - Masks applied: the masked video lands at `masked_path` and `input`
///   is deleted.
/// - Masks skipped or failed: `input` is renamed to `final_path` and the
///   outcome says why it is unmasked.
pub async fn publish_recording(
    encoder: &Path,
    input: &Path,
    final_path: &Path,
    masked_path: &Path,
    frame: &MaskFrame,
    masks: &[MaskRect],
) -> RdtileResult<FinishedRecording> {
    if masks.is_empty() {
        move_into_place(input, final_path).await?;
        return Ok(FinishedRecording::new(
            final_path.to_path_buf(),
            MaskingOutcome::NotRequested,
        ));
    }

    match apply_masks(encoder, input, masked_path, frame, masks).await {
        MaskPass::Applied { regions } => {
            if input != masked_path {
                remove_file_logged(input).await;
            }
            Ok(FinishedRecording::new(
                masked_path.to_path_buf(),
                MaskingOutcome::Applied { regions },
            ))
        }
        MaskPass::Skipped => {
            move_into_place(input, final_path).await?;
            Ok(FinishedRecording::new(
                final_path.to_path_buf(),
                MaskingOutcome::Skipped,
            ))
        }
        MaskPass::Failed { reason } => {
            move_into_place(input, final_path).await?;
            Ok(FinishedRecording::new(
                final_path.to_path_buf(),
                MaskingOutcome::Degraded { reason },
            ))
        }
    }
}

async fn move_into_place(from: &Path, to: &Path) -> RdtileResult<()> {
    if from == to {
        return Ok(());
    }
    tokio::fs::rename(from, to).await.map_err(|e| {
        RdtileError::capture(format!(
            "Failed to publish {} as {}: {e}",
            from.display(),
            to.display()
        ))
    })
}
