use std::sync::Arc;
use std::time::{Duration, Instant};

use face_scan::{
    cancellation, AcceptanceThresholds, CameraIntrinsics, CaptureConfig, CaptureError,
    CapturePhase, CaptureScheduler, ColorFrame, ColorSpace, DepthFrame, FaceAnalysis,
    LandmarkAnalyzer, LandmarkPoint, PointCloud, SnapshotStore, Violation,
};
use tokio::sync::watch;

const WIDTH: usize = 160;
const HEIGHT: usize = 120;

/// Depth sphere in front of an invalid background.
fn sphere_frames(radius: f32, sequence: u32) -> (DepthFrame, ColorFrame, CameraIntrinsics) {
    let (cx, cy) = (WIDTH as f32 / 2.0, HEIGHT as f32 / 2.0);
    let mut depth = vec![0.0f32; WIDTH * HEIGHT];

    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let r2 = (dx * dx + dy * dy) / (radius * radius);
            if r2 <= 1.0 {
                depth[x + y * WIDTH] = 0.5 - 0.1 * (1.0 - r2).sqrt();
            }
        }
    }

    (
        DepthFrame {
            width: WIDTH,
            height: HEIGHT,
            buffer: depth,
            sequence,
            timestamp_ms: u64::from(sequence) * 33,
        },
        ColorFrame {
            color_space: ColorSpace::RGB,
            width: WIDTH,
            height: HEIGHT,
            stride: WIDTH * 3,
            buffer: vec![127; WIDTH * HEIGHT * 3],
            sequence,
            timestamp_ms: u64::from(sequence) * 33,
        },
        CameraIntrinsics {
            fx: 200.0,
            fy: 200.0,
            cx,
            cy,
            ref_width: WIDTH as f32,
            ref_height: HEIGHT as f32,
        },
    )
}

fn test_config() -> CaptureConfig {
    CaptureConfig {
        window: Duration::from_millis(400),
        tick_interval: Duration::from_millis(50),
        acceptance: AcceptanceThresholds {
            min_valid_ratio: 0.01,
            min_points: 500,
            ..AcceptanceThresholds::default()
        },
        ..CaptureConfig::default()
    }
}

struct TiltedFace;

impl LandmarkAnalyzer for TiltedFace {
    fn analyze(&self, _frame: &ColorFrame) -> Option<FaceAnalysis> {
        let landmarks = vec![
            LandmarkPoint { x: 0.4, y: 0.45 },
            LandmarkPoint { x: 0.6, y: 0.45 },
            LandmarkPoint { x: 0.5, y: 0.65 },
        ];
        let centroid = FaceAnalysis::centroid_of(&landmarks);

        Some(FaceAnalysis {
            landmarks,
            yaw: 0.0,
            pitch: 0.0,
            roll: 40.0, // way past any roll threshold
            mouth_ratio: 0.01,
            interocular: 0.2,
            centroid,
        })
    }
}

#[tokio::test]
async fn empty_source_fails_with_no_frames() {
    let store = Arc::new(SnapshotStore::new());
    let scheduler = CaptureScheduler::new(
        Arc::clone(&store),
        CaptureConfig {
            window: Duration::from_millis(250),
            tick_interval: Duration::from_millis(50),
            ..CaptureConfig::default()
        },
    );

    let (_cancel, cancel_rx) = cancellation();
    let result = scheduler.run(cancel_rx).await;

    assert_eq!(result.unwrap_err(), CaptureError::NoFrames);
}

#[tokio::test]
async fn capture_produces_a_parseable_cloud() {
    let store = Arc::new(SnapshotStore::new());
    let (depth, color, intrinsics) = sphere_frames(50.0, 1);
    store.publish(depth, color, intrinsics);

    let scheduler = CaptureScheduler::new(Arc::clone(&store), test_config());
    let (_cancel, cancel_rx) = cancellation();

    let result = scheduler.run(cancel_rx).await.expect("capture should succeed");

    assert!(result.cloud.len() >= 1_000);
    assert!(result.candidates_seen > 0);
    assert_eq!(result.candidates_accepted, result.candidates_seen);
    assert!(result.pose_frames.is_empty());

    let ply = result.cloud.to_ply();
    let parsed = PointCloud::parse_ply(&ply).expect("emitted ply must parse");
    assert_eq!(parsed.len(), result.cloud.len());
}

#[tokio::test]
async fn sparse_geometry_fails_with_sparse_points() {
    let store = Arc::new(SnapshotStore::new());
    // tiny sphere: roughly 300 valid samples per frame, well under 1000
    let (depth, color, intrinsics) = sphere_frames(20.0, 1);
    store.publish(depth, color, intrinsics);

    let mut config = test_config();
    config.acceptance.min_points = 50;
    let scheduler = CaptureScheduler::new(Arc::clone(&store), config);
    let (_cancel, cancel_rx) = cancellation();

    match scheduler.run(cancel_rx).await {
        Err(CaptureError::SparsePoints(count)) => {
            assert!(count > 0);
            assert!(count < 1_000);
        }
        other => panic!("expected SparsePoints, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_finalizes_collected_candidates() {
    let store = Arc::new(SnapshotStore::new());
    let (depth, color, intrinsics) = sphere_frames(50.0, 1);
    store.publish(depth, color, intrinsics);

    let mut config = test_config();
    config.window = Duration::from_secs(10);
    let (phase_tx, phase_rx) = watch::channel(CapturePhase::Idle);
    let scheduler = Arc::new(
        CaptureScheduler::new(Arc::clone(&store), config).with_phase_channel(phase_tx),
    );
    let (cancel, cancel_rx) = cancellation();

    let task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(cancel_rx).await })
    };

    // let a few ticks land, then cancel long before the window ends
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*phase_rx.borrow(), CapturePhase::Sampling);
    let cancelled_at = Instant::now();
    cancel.cancel();

    let result = task.await.unwrap().expect("cancelled scan should finalize");

    assert!(cancelled_at.elapsed() < Duration::from_secs(2));
    assert_eq!(*phase_rx.borrow(), CapturePhase::Idle);
    assert!(result.candidates_seen >= 2);
    assert!(result.cloud.len() >= 1_000);
}

#[tokio::test]
async fn rejected_candidates_are_tallied_and_fall_back() {
    let store = Arc::new(SnapshotStore::new());
    let (depth, color, intrinsics) = sphere_frames(50.0, 1);
    store.publish(depth, color, intrinsics);

    let scheduler = CaptureScheduler::new(Arc::clone(&store), test_config())
        .with_analyzer(Arc::new(TiltedFace));
    let (_cancel, cancel_rx) = cancellation();

    let result = scheduler.run(cancel_rx).await.expect("fallback selection should succeed");

    // every candidate violated the roll limit, yet the scan still finalized
    assert_eq!(result.candidates_accepted, 0);
    assert_eq!(result.violations.count(Violation::Roll), result.candidates_seen);
    assert_eq!(result.violations.most_common().unwrap().0, Violation::Roll);
    assert!(result.cloud.len() >= 1_000);
}
