use std::sync::Arc;
use std::time::Duration;

use face_scan::{
    cancellation, run_scan_upload, CameraIntrinsics, CaptureConfig, CaptureScheduler, ColorFrame,
    ColorSpace, DepthFrame, ScanClient, ScanUploadState, SnapshotStore, UploadConfig,
};

const WIDTH: usize = 320;
const HEIGHT: usize = 240;

/// Synthetic stand-in for the sensor subsystem: a sphere bulging out of an
/// invalid background, with a simple color gradient.
fn synthetic_frames(sequence: u32) -> (DepthFrame, ColorFrame, CameraIntrinsics) {
    let radius = 100.0 + (sequence % 5) as f32;
    let (cx, cy) = (WIDTH as f32 / 2.0, HEIGHT as f32 / 2.0);

    let mut depth = vec![0.0f32; WIDTH * HEIGHT];
    let mut color = vec![0u8; WIDTH * HEIGHT * 3];

    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let r2 = (dx * dx + dy * dy) / (radius * radius);

            if r2 <= 1.0 {
                depth[x + y * WIDTH] = 0.6 - 0.15 * (1.0 - r2).sqrt();
            }

            let offset = (x + y * WIDTH) * 3;
            color[offset] = (x * 255 / WIDTH) as u8;
            color[offset + 1] = (y * 255 / HEIGHT) as u8;
            color[offset + 2] = 180;
        }
    }

    let timestamp_ms = u64::from(sequence) * 33;

    (
        DepthFrame {
            width: WIDTH,
            height: HEIGHT,
            buffer: depth,
            sequence,
            timestamp_ms,
        },
        ColorFrame {
            color_space: ColorSpace::RGB,
            width: WIDTH,
            height: HEIGHT,
            stride: WIDTH * 3,
            buffer: color,
            sequence,
            timestamp_ms,
        },
        CameraIntrinsics {
            fx: 300.0,
            fy: 300.0,
            cx: WIDTH as f32 / 2.0,
            cy: HEIGHT as f32 / 2.0,
            ref_width: WIDTH as f32,
            ref_height: HEIGHT as f32,
        },
    )
}

#[tokio::main]
async fn main() -> Result<(), face_scan::Error> {
    env_logger::init();

    let store = Arc::new(SnapshotStore::new());

    let feeder_store = Arc::clone(&store);
    let feeder = tokio::spawn(async move {
        let mut sequence = 0u32;
        loop {
            let (depth, color, intrinsics) = synthetic_frames(sequence);
            feeder_store.publish(depth, color, intrinsics);
            sequence = sequence.wrapping_add(1);
            tokio::time::sleep(Duration::from_millis(33)).await;
        }
    });

    let config = CaptureConfig {
        window: Duration::from_secs(3),
        tick_interval: Duration::from_millis(150),
        ..CaptureConfig::default()
    };
    let scheduler = CaptureScheduler::new(Arc::clone(&store), config);

    let (cancel_handle, cancel_rx) = cancellation();
    let result = scheduler.run(cancel_rx).await?;
    drop(cancel_handle);
    feeder.abort();

    let ply = result.cloud.to_ply();
    std::fs::write("scan.ply", &ply)?;
    println!(
        "wrote scan.ply: {} points from {} of {} candidates",
        result.cloud.len(),
        result.candidates_accepted,
        result.candidates_seen
    );

    // upload only when a scan service is configured
    let Ok(base_url) = std::env::var("SCAN_API_URL") else {
        return Ok(());
    };

    let client = Arc::new(ScanClient::new(UploadConfig {
        base_url,
        ..UploadConfig::default()
    }));
    let (state_tx, mut state_rx) = tokio::sync::watch::channel(ScanUploadState::Idle);
    let (cancel_handle, cancel_rx) = cancellation();

    let watcher = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            println!("upload state: {:?}", *state_rx.borrow());
        }
    });

    let outcome = run_scan_upload(
        client,
        ply.into_bytes(),
        result.pose_frames,
        state_tx,
        cancel_rx,
    )
    .await;
    drop(cancel_handle);
    watcher.abort();

    match outcome {
        Ok(scan_id) => {
            println!("scan processed, id {scan_id}");
            Ok(())
        }
        Err(failure) => {
            if let Some(path) = &failure.fallback_path {
                println!("upload failed, scan saved to {}", path.display());
            }
            Err(failure.error.into())
        }
    }
}
