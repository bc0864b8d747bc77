//! Fake encoders for engine tests.
//!
//! Each fake is a shell script that treats its last argument as the output
//! file and imitates the ffmpeg invocation it recognizes. Scripts are
//! written once per test binary, before any test spawns a process.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use image::{Rgba, RgbaImage};
use rdtile_common::error::RdtileResult;
use rdtile_platform_core::{WindowCapturer, WindowHandle};
use tempfile::TempDir;

const PRELUDE: &str = r#"#!/bin/sh
for arg in "$@"; do out="$arg"; done
case " $* " in
  *" -version "*) echo "ffmpeg version 6.0-fake"; exit 0 ;;
esac
"#;

const ENCODER_BODY: &str = r#"
case "$*" in
  *drawbox=*) @MASK@ ;;
  *image2pipe*) cat > "$out"; exit 0 ;;
  *"-f concat"*) @CONCAT@ ;;
esac
echo "segment" > "$out"
read -r line
exit 0
"#;

const MASK_OK: &str = r#"echo "masked" > "$out"; exit 0"#;
const MASK_FAIL: &str = r#"echo "drawbox: invalid filter graph" >&2; exit 1"#;

const CONCAT_OK: &str = r#"echo "joined" > "$out"; exit 0"#;
const CONCAT_HANG: &str = r#"echo "partial" > "$out"; exec sleep 60"#;
const CONCAT_FAIL: &str =
    r#"echo "truncated" > "$out"; echo "Non-monotonous DTS" >&2; exit 1"#;

// Spawn counter keyed by the output directory, so tests sharing the
// script do not see each other's invocations.
const SECOND_SPAWN_CRASHES_BODY: &str = r#"
counter="$(dirname "$0")/spawns-$(basename "$(dirname "$out")")"
n=$(cat "$counter" 2>/dev/null || echo 0)
n=$((n + 1))
echo "$n" > "$counter"
if [ "$n" -ge 2 ]; then
  echo "partial" > "$out"
  echo "Device or resource busy" >&2
  exit 3
fi
echo "segment" > "$out"
read -r line
exit 0
"#;

const CRASHING_BODY: &str = r#"
echo "partial" > "$out"
echo "Could not open display" >&2
exit 3
"#;

struct Fakes {
    _dir: TempDir,
    encoder: PathBuf,
    mask_failing: PathBuf,
    crashing: PathBuf,
    concat_hanging: PathBuf,
    concat_failing: PathBuf,
    second_spawn_crashes: PathBuf,
}

fn encoder_script(mask: &str, concat: &str) -> String {
    format!(
        "{PRELUDE}{}",
        ENCODER_BODY.replace("@MASK@", mask).replace("@CONCAT@", concat)
    )
}

fn fakes() -> &'static Fakes {
    static FAKES: OnceLock<Fakes> = OnceLock::new();
    FAKES.get_or_init(|| {
        let dir = tempfile::tempdir().expect("temp dir for fake encoders");
        let encoder = write_script(dir.path(), "ffmpeg", &encoder_script(MASK_OK, CONCAT_OK));
        let mask_failing = write_script(
            dir.path(),
            "ffmpeg-mask-fails",
            &encoder_script(MASK_FAIL, CONCAT_OK),
        );
        let crashing = write_script(
            dir.path(),
            "ffmpeg-crashes",
            &format!("{PRELUDE}{CRASHING_BODY}"),
        );
        let concat_hanging = write_script(
            dir.path(),
            "ffmpeg-concat-hangs",
            &encoder_script(MASK_OK, CONCAT_HANG),
        );
        let concat_failing = write_script(
            dir.path(),
            "ffmpeg-concat-fails",
            &encoder_script(MASK_OK, CONCAT_FAIL),
        );
        let second_spawn_crashes = write_script(
            dir.path(),
            "ffmpeg-second-spawn-crashes",
            &format!("{PRELUDE}{SECOND_SPAWN_CRASHES_BODY}"),
        );
        Fakes {
            _dir: dir,
            encoder,
            mask_failing,
            crashing,
            concat_hanging,
            concat_failing,
            second_spawn_crashes,
        }
    })
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write fake encoder");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("make fake encoder executable");
    path
}

/// Well-behaved encoder.
pub fn fake_encoder() -> PathBuf {
    fakes().encoder.clone()
}

/// Encoder whose masking pass always fails.
pub fn mask_failing_encoder() -> PathBuf {
    fakes().mask_failing.clone()
}

/// Encoder that dies right after starting.
pub fn crashing_encoder() -> PathBuf {
    fakes().crashing.clone()
}

/// Encoder whose concat pass writes a partial file and never exits.
pub fn concat_hanging_encoder() -> PathBuf {
    fakes().concat_hanging.clone()
}

/// Encoder whose concat pass leaves a truncated file and exits non-zero.
pub fn concat_failing_encoder() -> PathBuf {
    fakes().concat_failing.clone()
}

/// Encoder that records the first segment of a session and dies on
/// every later spawn for the same output folder.
pub fn second_spawn_crashing_encoder() -> PathBuf {
    fakes().second_spawn_crashes.clone()
}

/// Sorted file names in `dir`.
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read output dir")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}

/// Window capturer returning a solid gray surface.
pub struct GrayWindow {
    pub width: u32,
    pub height: u32,
}

impl WindowCapturer for GrayWindow {
    fn capture(&self, _window: WindowHandle) -> RdtileResult<RgbaImage> {
        Ok(RgbaImage::from_pixel(
            self.width,
            self.height,
            Rgba([128, 128, 128, 255]),
        ))
    }
}

/// Gray capturer that counts how often it was asked for a frame.
#[derive(Default)]
pub struct CountingWindow {
    captures: AtomicU64,
}

impl CountingWindow {
    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }
}

impl WindowCapturer for CountingWindow {
    fn capture(&self, _window: WindowHandle) -> RdtileResult<RgbaImage> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(RgbaImage::from_pixel(320, 240, Rgba([64, 64, 64, 255])))
    }
}
