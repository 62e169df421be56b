use std::sync::Mutex;

use crate::frame::{CameraIntrinsics, ColorFrame, DepthFrame};

/// One synchronized (depth, color, intrinsics) triple.
///
/// The pair is captured at a single instant by the frame source; the store
/// never hands out a depth frame together with a color frame from a
/// different capture.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub depth: DepthFrame,
    pub color: ColorFrame,
    pub intrinsics: CameraIntrinsics,
}

/// Holds the most recent frame snapshot behind a mutex.
///
/// The frame-arrival path calls [`SnapshotStore::publish`] at sensor rate;
/// the sampling loop calls [`SnapshotStore::latest`] at its own cadence.
/// The lock is held only for the duration of the swap or clone, never
/// across projection or scoring work.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    latest: Mutex<Option<FrameSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current snapshot. The previous one is dropped.
    pub fn publish(&self, depth: DepthFrame, color: ColorFrame, intrinsics: CameraIntrinsics) {
        let snapshot = FrameSnapshot {
            depth,
            color,
            intrinsics,
        };

        *self.latest.lock().expect("snapshot lock poisoned") = Some(snapshot);
    }

    /// Take an atomic copy of the latest snapshot, if any arrived yet.
    pub fn latest(&self) -> Option<FrameSnapshot> {
        self.latest.lock().expect("snapshot lock poisoned").clone()
    }

    pub fn clear(&self) {
        *self.latest.lock().expect("snapshot lock poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ColorSpace;

    fn snapshot_parts(sequence: u32) -> (DepthFrame, ColorFrame, CameraIntrinsics) {
        let depth = DepthFrame {
            width: 1,
            height: 1,
            buffer: vec![0.5],
            sequence,
            timestamp_ms: u64::from(sequence) * 33,
        };
        let color = ColorFrame {
            color_space: ColorSpace::RGB,
            width: 1,
            height: 1,
            stride: 3,
            buffer: vec![0, 0, 0],
            sequence,
            timestamp_ms: u64::from(sequence) * 33,
        };
        let intrinsics = CameraIntrinsics {
            fx: 1.0,
            fy: 1.0,
            cx: 0.5,
            cy: 0.5,
            ref_width: 1.0,
            ref_height: 1.0,
        };

        (depth, color, intrinsics)
    }

    #[test]
    fn latest_is_none_until_published() {
        let store = SnapshotStore::new();
        assert!(store.latest().is_none());

        let (depth, color, intrinsics) = snapshot_parts(1);
        store.publish(depth, color, intrinsics);
        assert_eq!(store.latest().unwrap().depth.sequence, 1);
    }

    #[test]
    fn publish_replaces_previous_snapshot() {
        let store = SnapshotStore::new();

        for sequence in 1..=3 {
            let (depth, color, intrinsics) = snapshot_parts(sequence);
            store.publish(depth, color, intrinsics);
        }

        let snapshot = store.latest().unwrap();
        assert_eq!(snapshot.depth.sequence, 3);
        assert_eq!(snapshot.color.sequence, 3);

        store.clear();
        assert!(store.latest().is_none());
    }
}
