//! Record command: drive the recording workflow over a fixed screen region.
//!
//! The region stands in for a remote-desktop window. Controls are read
//! from stdin one line at a time; Ctrl+C saves.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use rdtile_common::config::RecordingSettings;
use rdtile_common::error::{RdtileError, RdtileResult};
use rdtile_platform_core::{MaskRect, Rect, WindowHandle, WindowInfo, WindowService};
use rdtile_workflow::{MaskEditingChrome, RecordingState, RecordingWorkflow, WorkflowEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

const REGION_WINDOW: WindowHandle = WindowHandle(1);

/// Window service exposing one pseudo-window covering `region`.
struct StaticRegion {
    region: Rect,
    desktop: Rect,
}

impl StaticRegion {
    fn check(&self, window: WindowHandle) -> RdtileResult<()> {
        if window == REGION_WINDOW {
            Ok(())
        } else {
            Err(RdtileError::platform(format!("unknown window {window}")))
        }
    }
}

#[async_trait::async_trait]
impl WindowService for StaticRegion {
    async fn capture_candidates(&self) -> RdtileResult<Vec<WindowInfo>> {
        Ok(vec![WindowInfo {
            handle: REGION_WINDOW,
            title: "screen region".to_string(),
            last_maximized_seq: None,
        }])
    }

    async fn client_area_screen_bounds(&self, window: WindowHandle) -> RdtileResult<Rect> {
        self.check(window)?;
        Ok(self.region)
    }

    async fn monitor_bounds_for_window(&self, window: WindowHandle) -> RdtileResult<Rect> {
        self.check(window)?;
        Ok(self.desktop)
    }

    async fn window_bounds(&self, window: WindowHandle) -> RdtileResult<Rect> {
        self.check(window)?;
        Ok(self.region)
    }

    async fn virtual_desktop_bounds(&self) -> RdtileResult<Rect> {
        Ok(self.desktop)
    }
}

/// Terminal stand-in for the mask-editing overlay.
struct ConsoleChrome {
    masks: Mutex<Vec<MaskRect>>,
}

#[async_trait::async_trait]
impl MaskEditingChrome for ConsoleChrome {
    async fn show_mask_editing(&self, _monitor_bounds: Rect, capture_bounds: Rect) {
        println!(
            "Region: {}x{} at ({}, {})",
            capture_bounds.width, capture_bounds.height, capture_bounds.x, capture_bounds.y
        );
    }

    async fn enter_recording_mode(&self) {}

    async fn enter_pause_edit_mode(&self) {
        println!("Paused. Add masks with `m x,y,w,h`, resume with `r`.");
    }

    async fn re_enter_recording_mode(&self) {}

    async fn mask_rects_px(&self) -> Vec<MaskRect> {
        self.masks.lock().await.clone()
    }

    async fn close(&self) {}

    async fn show_status(&self, message: &str) {
        println!("{message}");
    }
}

/// One line of stdin input.
#[derive(Debug, PartialEq)]
enum Control {
    Pause,
    Resume,
    Save,
    Discard,
    Cancel,
    Mask(Rect),
    Help,
}

fn parse_control(line: &str) -> Control {
    let line = line.trim();
    match line {
        "p" | "pause" => Control::Pause,
        "r" | "resume" => Control::Resume,
        "s" | "save" | "stop" => Control::Save,
        "d" | "discard" => Control::Discard,
        "c" | "cancel" => Control::Cancel,
        _ => match line.strip_prefix("m ") {
            Some(rect) => crate::parse_rect(rect).map_or(Control::Help, Control::Mask),
            None => Control::Help,
        },
    }
}

fn print_controls() {
    println!("Controls: p=pause  r=resume  s=save  d=discard  c=cancel  m x,y,w,h=add mask");
}

pub async fn run(
    settings: RecordingSettings,
    region: Rect,
    desktop: Rect,
    masks: Vec<Rect>,
) -> anyhow::Result<()> {
    println!("rdtile recorder");
    println!("  Output: {}", settings.output_folder.display());
    println!("  FPS:    {}", settings.fps);
    println!("  Masks:  {}", masks.len());
    println!();

    let chrome = Arc::new(ConsoleChrome {
        masks: Mutex::new(masks),
    });
    let windows = Arc::new(StaticRegion { region, desktop });
    let workflow = RecordingWorkflow::new(settings, windows, chrome.clone(), None);

    let mut events = workflow.subscribe();
    let state_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let WorkflowEvent::StateChanged(state) = event {
                tracing::debug!(?state, "Workflow state changed");
            }
        }
    });

    workflow.start_mask_editing(REGION_WINDOW).await;
    if workflow.state() != RecordingState::MaskEditing {
        bail!("could not open the capture region");
    }
    workflow.start_recording().await;
    if workflow.state() != RecordingState::Recording {
        workflow.cancel().await;
        bail!("recording did not start");
    }
    print_controls();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let saved: Option<PathBuf> = loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                None
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break workflow.stop(true).await.map(|r| r.path);
        };

        match parse_control(&line) {
            Control::Pause => workflow.pause().await,
            Control::Resume => workflow.resume().await,
            Control::Save => break workflow.stop(true).await.map(|r| r.path),
            Control::Discard => {
                workflow.stop(false).await;
                break None;
            }
            Control::Cancel => {
                workflow.cancel().await;
                break None;
            }
            Control::Mask(rect) => {
                if workflow.state() == RecordingState::Paused {
                    let mut masks = chrome.masks.lock().await;
                    masks.push(rect);
                    println!("Mask added ({} total)", masks.len());
                } else {
                    println!("Masks can only be added while paused");
                }
            }
            Control::Help => print_controls(),
        }
    };

    state_log.abort();
    if let Some(path) = saved {
        println!("Recording: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_controls() {
        assert_eq!(parse_control(" p "), Control::Pause);
        assert_eq!(parse_control("resume"), Control::Resume);
        assert_eq!(parse_control("s"), Control::Save);
        assert_eq!(parse_control("m 10,20,30,40"), Control::Mask(Rect::new(10, 20, 30, 40)));
        assert_eq!(parse_control("m 10,20"), Control::Help);
        assert_eq!(parse_control("?"), Control::Help);
    }

    #[tokio::test]
    async fn static_region_rejects_other_windows() {
        let host = StaticRegion {
            region: Rect::new(0, 0, 640, 480),
            desktop: Rect::new(0, 0, 1920, 1080),
        };
        assert_eq!(
            host.client_area_screen_bounds(REGION_WINDOW).await.unwrap(),
            Rect::new(0, 0, 640, 480)
        );
        assert!(host.window_bounds(WindowHandle(7)).await.is_err());
    }
}
