//! ffmpeg argument builders.
//!
//! Every builder ends with `-y <output>`; nothing here touches the disk.

use std::path::Path;

use rdtile_platform_core::Rect;

/// Video codec for every encode.
pub const VIDEO_CODEC: &str = "libx264";
/// Preset used while capturing live.
pub const CAPTURE_PRESET: &str = "ultrafast";
/// Preset used for the masking re-encode.
pub const MASK_PRESET: &str = "veryfast";
pub const PIXEL_FORMAT: &str = "yuv420p";

/// Screen-grab input device for the current platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// Windows GDI desktop grabber.
    GdiGrab,
    /// X11 root-window grabber on the given display (e.g. `:0.0`).
    X11Grab { display: String },
}

impl CaptureSource {
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            CaptureSource::GdiGrab
        } else {
            let display = std::env::var("DISPLAY")
                .ok()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| ":0.0".to_string());
            CaptureSource::X11Grab { display }
        }
    }
}

fn quiet_prelude() -> Vec<String> {
    ["-hide_banner", "-nostats", "-loglevel", "warning"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn push_output(args: &mut Vec<String>, output: &Path) {
    args.push("-y".to_string());
    args.push(output.to_string_lossy().into_owned());
}

/// Screen-grab of `region` (screen coordinates, even size) to `output`.
pub fn segment_capture_args(
    source: &CaptureSource,
    region: Rect,
    fps: u32,
    include_cursor: bool,
    output: &Path,
) -> Vec<String> {
    let mut args = quiet_prelude();
    let draw_mouse = if include_cursor { "1" } else { "0" };
    let size = format!("{}x{}", region.width, region.height);

    match source {
        CaptureSource::GdiGrab => {
            args.extend([
                "-f".to_string(),
                "gdigrab".to_string(),
                "-framerate".to_string(),
                fps.to_string(),
                "-offset_x".to_string(),
                region.x.to_string(),
                "-offset_y".to_string(),
                region.y.to_string(),
                "-video_size".to_string(),
                size,
                "-draw_mouse".to_string(),
                draw_mouse.to_string(),
                "-i".to_string(),
                "desktop".to_string(),
            ]);
        }
        CaptureSource::X11Grab { display } => {
            args.extend([
                "-f".to_string(),
                "x11grab".to_string(),
                "-framerate".to_string(),
                fps.to_string(),
                "-video_size".to_string(),
                size,
                "-draw_mouse".to_string(),
                draw_mouse.to_string(),
                "-i".to_string(),
                format!("{display}+{},{}", region.x, region.y),
            ]);
        }
    }

    push_live_encode(&mut args);
    push_output(&mut args, output);
    args
}

/// Encode BMP frames arriving on stdin to `output`.
pub fn frame_pipe_args(fps: u32, output: &Path) -> Vec<String> {
    let mut args = quiet_prelude();
    args.extend([
        "-f".to_string(),
        "image2pipe".to_string(),
        "-framerate".to_string(),
        fps.max(1).to_string(),
        "-c:v".to_string(),
        "bmp".to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
    ]);
    push_live_encode(&mut args);
    push_output(&mut args, output);
    args
}

fn push_live_encode(args: &mut Vec<String>) {
    args.extend([
        "-c:v".to_string(),
        VIDEO_CODEC.to_string(),
        "-preset".to_string(),
        CAPTURE_PRESET.to_string(),
        "-pix_fmt".to_string(),
        PIXEL_FORMAT.to_string(),
    ]);
}

/// Stream-copy concatenation driven by a manifest file.
pub fn concat_args(manifest: &Path, output: &Path) -> Vec<String> {
    let mut args = quiet_prelude();
    args.extend([
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        manifest.to_string_lossy().into_owned(),
        "-c".to_string(),
        "copy".to_string(),
    ]);
    push_output(&mut args, output);
    args
}

/// Re-encode `input` through a filter chain.
pub fn mask_args(input: &Path, filter: &str, output: &Path) -> Vec<String> {
    let mut args = quiet_prelude();
    args.extend([
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-vf".to_string(),
        filter.to_string(),
        "-c:v".to_string(),
        VIDEO_CODEC.to_string(),
        "-preset".to_string(),
        MASK_PRESET.to_string(),
        "-pix_fmt".to_string(),
        PIXEL_FORMAT.to_string(),
    ]);
    push_output(&mut args, output);
    args
}

/// Concat-demuxer manifest listing `segments` in order.
///
/// Single quotes inside paths are escaped the way the demuxer expects
/// (`'` becomes `'\''`).
pub fn concat_manifest<P: AsRef<Path>>(segments: &[P]) -> String {
    let mut manifest = String::new();
    for segment in segments {
        let path = segment.as_ref().to_string_lossy().replace('\'', "'\\''");
        manifest.push_str("file '");
        manifest.push_str(&path);
        manifest.push_str("'\n");
    }
    manifest
}
