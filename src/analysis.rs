use crate::frame::ColorFrame;

/// One face landmark in normalized image coordinates [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
}

impl LandmarkPoint {
    pub fn distance_to(&self, other: &LandmarkPoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Per-frame face detection result from the external landmark analyzer.
///
/// Absence of the whole struct means "no face detected" and is treated as
/// neutral by downstream scoring, not as a rejection.
#[derive(Debug, Clone)]
pub struct FaceAnalysis {
    /// Landmark points, normalized to the color frame.
    pub landmarks: Vec<LandmarkPoint>,
    /// Head rotation (degrees).
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    /// Mouth openness relative to face height.
    pub mouth_ratio: f32,
    /// Distance between eye centers, normalized.
    pub interocular: f32,
    pub centroid: LandmarkPoint,
}

impl FaceAnalysis {
    pub fn centroid_of(landmarks: &[LandmarkPoint]) -> LandmarkPoint {
        if landmarks.is_empty() {
            return LandmarkPoint::default();
        }

        let n = landmarks.len() as f32;
        let (sx, sy) = landmarks
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));

        LandmarkPoint {
            x: sx / n,
            y: sy / n,
        }
    }
}

/// Root-mean-square displacement between two landmark sets.
///
/// Returns `None` when either set is empty or their sizes differ, which
/// happens when the detector switches landmark models mid-capture.
pub fn landmark_rms(a: &[LandmarkPoint], b: &[LandmarkPoint]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let sum: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(p, q)| {
            let dx = p.x - q.x;
            let dy = p.y - q.y;
            dx * dx + dy * dy
        })
        .sum();

    Some((sum / a.len() as f32).sqrt())
}

/// External face-landmark detector.
///
/// Implementations may fail silently; `None` carries no error signal
/// beyond absence.
pub trait LandmarkAnalyzer: Send + Sync {
    fn analyze(&self, frame: &ColorFrame) -> Option<FaceAnalysis>;
}
