#![cfg(unix)]

mod support;

use std::path::Path;
use std::time::Duration;

use rdtile_capture_engine::encoder_args::CaptureSource;
use rdtile_capture_engine::{MaskingOutcome, RecordingEngine, RecordingProfile, SegmentRecorder};
use rdtile_platform_core::Rect;

use support::{
    concat_failing_encoder, concat_hanging_encoder, crashing_encoder, fake_encoder, files_in,
    mask_failing_encoder, second_spawn_crashing_encoder,
};

const DESKTOP: Rect = Rect::new(0, 0, 1920, 1080);
const REGION: Rect = Rect::new(10, 20, 1280, 720);

fn recorder() -> SegmentRecorder {
    SegmentRecorder::new(CaptureSource::X11Grab {
        display: ":99".to_string(),
    })
}

async fn start(recorder: &SegmentRecorder, dir: &Path, encoder: &Path) {
    let profile = RecordingProfile {
        fps: 30,
        include_cursor: true,
    };
    recorder
        .start(REGION, DESKTOP, profile, dir, encoder)
        .await
        .expect("recording should start");
}

#[tokio::test]
async fn single_segment_is_renamed_without_concat() {
    let encoder = fake_encoder();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder();

    start(&recorder, dir.path(), &encoder).await;
    assert!(recorder.is_running());
    assert_eq!(recorder.segments().await.len(), 1);

    let finished = recorder.finalize_recording(&[]).await.unwrap();

    assert_eq!(finished.masking, MaskingOutcome::NotRequested);
    assert_eq!(std::fs::read_to_string(&finished.path).unwrap(), "segment\n");
    let name = finished.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("rec_") && name.ends_with(".mp4"));
    assert!(!name.contains("_seg"));
    assert_eq!(files_in(dir.path()), vec![name]);
    assert!(!recorder.is_running());
}

#[tokio::test]
async fn pause_resume_produces_concatenated_output() {
    let encoder = fake_encoder();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder();

    start(&recorder, dir.path(), &encoder).await;
    recorder.pause().await.unwrap();
    recorder.resume().await.unwrap();

    let segments = recorder.segments().await;
    assert_eq!(segments.len(), 2);
    assert!(segments[0].to_string_lossy().ends_with("_seg001.mp4"));
    assert!(segments[1].to_string_lossy().ends_with("_seg002.mp4"));

    let finished = recorder.finalize_recording(&[]).await.unwrap();

    assert_eq!(std::fs::read_to_string(&finished.path).unwrap(), "joined\n");
    let name = finished.path.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(files_in(dir.path()), vec![name]);
}

#[tokio::test]
async fn masks_are_applied_to_single_segment() {
    let encoder = fake_encoder();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder();

    start(&recorder, dir.path(), &encoder).await;
    let finished = recorder
        .finalize_recording(&[Rect::new(1190, 20, 200, 200)])
        .await
        .unwrap();

    assert_eq!(finished.masking, MaskingOutcome::Applied { regions: 1 });
    assert_eq!(std::fs::read_to_string(&finished.path).unwrap(), "masked\n");
    assert_eq!(files_in(dir.path()).len(), 1);
}

#[tokio::test]
async fn masks_outside_frame_skip_the_masking_pass() {
    let encoder = fake_encoder();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder();

    start(&recorder, dir.path(), &encoder).await;
    let finished = recorder
        .finalize_recording(&[Rect::new(5000, 5000, 10, 10)])
        .await
        .unwrap();

    assert_eq!(finished.masking, MaskingOutcome::Skipped);
    assert_eq!(std::fs::read_to_string(&finished.path).unwrap(), "segment\n");
}

#[tokio::test]
async fn failed_masking_keeps_unmasked_concatenation() {
    let encoder = mask_failing_encoder();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder();

    start(&recorder, dir.path(), &encoder).await;
    recorder.pause().await.unwrap();
    recorder.resume().await.unwrap();

    let finished = recorder
        .finalize_recording(&[Rect::new(0, 0, 100, 100)])
        .await
        .unwrap();

    match &finished.masking {
        MaskingOutcome::Degraded { reason } => {
            assert!(reason.contains("exited"), "{reason}");
        }
        other => panic!("expected degraded masking, got {other:?}"),
    }
    assert_eq!(std::fs::read_to_string(&finished.path).unwrap(), "joined\n");
    // Segments, manifest and the masking temp file are all gone.
    let name = finished.path.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(files_in(dir.path()), vec![name]);
}

#[tokio::test]
async fn immediate_encoder_exit_fails_start_and_cleans_up() {
    let encoder = crashing_encoder();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder();

    let err = recorder
        .start(REGION, DESKTOP, RecordingProfile::default(), dir.path(), &encoder)
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("Could not open display"), "{message}");
    assert!(files_in(dir.path()).is_empty());
    assert!(!recorder.is_running());
}

#[tokio::test]
async fn abort_deletes_every_segment() {
    let encoder = fake_encoder();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder();

    start(&recorder, dir.path(), &encoder).await;
    recorder.pause().await.unwrap();
    recorder.resume().await.unwrap();
    assert_eq!(files_in(dir.path()).len(), 2);

    recorder.abort().await;

    assert!(files_in(dir.path()).is_empty());
    assert!(!recorder.is_running());
    assert!(recorder.finalize_recording(&[]).await.is_err());
}

#[tokio::test]
async fn region_is_clipped_to_desktop() {
    let encoder = fake_encoder();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder();

    recorder
        .start(
            Rect::new(-101, 0, 640, 480),
            DESKTOP,
            RecordingProfile::default(),
            dir.path(),
            &encoder,
        )
        .await
        .unwrap();

    // A mask entirely in the off-screen part is dropped after re-alignment.
    let finished = recorder
        .finalize_recording(&[Rect::new(0, 0, 100, 100)])
        .await
        .unwrap();
    assert_eq!(finished.masking, MaskingOutcome::Skipped);
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

#[tokio::test]
async fn crashed_second_segment_is_untracked_and_deleted() {
    let encoder = second_spawn_crashing_encoder();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder();

    start(&recorder, dir.path(), &encoder).await;
    recorder.stop_current_segment().await;

    assert!(!recorder.start_new_segment().await);

    let segments = recorder.segments().await;
    assert_eq!(segments.len(), 1);
    assert!(segments[0].to_string_lossy().ends_with("_seg001.mp4"));
    assert_eq!(files_in(dir.path()), vec![file_name(&segments[0])]);

    // Resuming through the engine surfaces the encoder's complaint.
    let err = recorder.resume().await.unwrap_err();
    assert!(err.to_string().contains("Device or resource busy"), "{err}");
    assert_eq!(files_in(dir.path()), vec![file_name(&segments[0])]);

    let finished = recorder.finalize_recording(&[]).await.unwrap();
    assert_eq!(std::fs::read_to_string(&finished.path).unwrap(), "segment\n");
    assert_eq!(files_in(dir.path()), vec![file_name(&finished.path)]);
}

async fn two_segment_recording(recorder: &SegmentRecorder, dir: &Path, encoder: &Path) {
    start(recorder, dir, encoder).await;
    recorder.pause().await.unwrap();
    recorder.resume().await.unwrap();
    assert_eq!(recorder.segments().await.len(), 2);
}

#[tokio::test]
async fn concat_timeout_publishes_first_segment_and_keeps_the_rest() {
    let encoder = concat_hanging_encoder();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder().with_concat_timeout(Duration::from_millis(500));

    two_segment_recording(&recorder, dir.path(), &encoder).await;
    let segments = recorder.segments().await;

    let finished = recorder.finalize_recording(&[]).await.unwrap();

    assert!(finished.is_partial());
    assert_eq!(finished.unjoined_segments, vec![segments[1].clone()]);
    assert_eq!(std::fs::read_to_string(&finished.path).unwrap(), "segment\n");
    assert!(!file_name(&finished.path).contains("_seg"));

    // The half-written concat output and the manifest are gone.
    let mut expected = vec![file_name(&finished.path), file_name(&segments[1])];
    expected.sort();
    assert_eq!(files_in(dir.path()), expected);
    assert!(!recorder.is_running());
}

#[tokio::test]
async fn failed_concat_with_output_keeps_segments() {
    let encoder = concat_failing_encoder();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder();

    two_segment_recording(&recorder, dir.path(), &encoder).await;
    let segments = recorder.segments().await;

    let finished = recorder
        .finalize_recording(&[Rect::new(0, 0, 100, 100)])
        .await
        .unwrap();

    // The truncated join is discarded instead of replacing the segments.
    assert_eq!(finished.masking, MaskingOutcome::Applied { regions: 1 });
    assert_eq!(std::fs::read_to_string(&finished.path).unwrap(), "masked\n");
    assert_eq!(finished.unjoined_segments, vec![segments[1].clone()]);
    assert!(!files_in(dir.path()).iter().any(|f| f.contains("_concat")));
    assert!(segments[1].exists());
    assert!(!segments[0].exists());
}
