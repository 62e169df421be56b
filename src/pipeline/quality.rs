use crate::analysis::FaceAnalysis;
use crate::config::{AcceptanceThresholds, ScoreWeights};
use crate::frame::ColorFrame;
use crate::pipeline::projector::PointRecord;

/// Valid-depth ratios below this are sensor noise, not signal.
const VALID_RATIO_NOISE_FLOOR: f32 = 0.05;
/// Point counts saturate their score contribution here.
const POINT_SATURATION: f32 = 30_000.0;
/// Normalized-landmark displacement at which stability scores drop to 0.5.
const LANDMARK_HALF_SCALE: f32 = 0.02;
/// Roll magnitude (degrees) at which roll stability reaches zero.
const ROLL_ZERO_DEGREES: f32 = 45.0;
/// Factor value for signals the detector did not produce.
const NEUTRAL: f32 = 0.5;

/// One sampling tick's scored, filterable unit of work.
///
/// Candidates are appended in strict temporal order and that order is the
/// tie-break everywhere downstream.
#[derive(Debug, Clone)]
pub struct FrameCandidate {
    pub points: Vec<PointRecord>,
    /// Samples the projector visited inside the region of interest.
    pub total_samples: usize,
    pub valid_ratio: f32,
    pub analysis: Option<FaceAnalysis>,
    /// Landmark RMS against the first successfully analyzed frame.
    pub landmark_rms: Option<f32>,
    /// Largest absolute yaw/pitch/roll change vs. the previous analyzed frame.
    pub pose_delta: Option<f32>,
    /// Landmark RMS vs. the previous analyzed frame.
    pub landmark_delta: Option<f32>,
    /// Centroid displacement vs. the previous analyzed frame.
    pub centroid_delta: Option<f32>,
    /// Retained only when the capture exports per-pose images.
    pub color: Option<ColorFrame>,
    pub timestamp_ms: u64,
}

impl FrameCandidate {
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn yaw(&self) -> Option<f32> {
        self.analysis.as_ref().map(|a| a.yaw)
    }

    pub fn pitch(&self) -> Option<f32> {
        self.analysis.as_ref().map(|a| a.pitch)
    }

    pub fn roll(&self) -> Option<f32> {
        self.analysis.as_ref().map(|a| a.roll)
    }

    pub fn mouth_ratio(&self) -> Option<f32> {
        self.analysis.as_ref().map(|a| a.mouth_ratio)
    }

    /// Metric tuple used to deduplicate candidates during bucket padding.
    pub fn metric_key(&self) -> (usize, u32, u32, u32) {
        (
            self.point_count(),
            self.valid_ratio.to_bits(),
            self.yaw().unwrap_or(f32::MAX).to_bits(),
            self.landmark_rms.unwrap_or(f32::MAX).to_bits(),
        )
    }
}

/// Which acceptance predicate a candidate failed.
///
/// The capture run tallies these across all candidates so a caller can
/// tell which condition dominated a failed or sparse scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Violation {
    ValidRatio,
    PointCount,
    Roll,
    MouthOpen,
    LandmarkRms,
    PoseDelta,
    CentroidDelta,
}

impl AcceptanceThresholds {
    /// Every predicate the candidate fails. Empty means accepted.
    ///
    /// Absent analysis signals are pass-through: a frame whose depth
    /// metrics alone are acceptable is never rejected for lacking a face.
    pub fn violations(&self, candidate: &FrameCandidate) -> Vec<Violation> {
        let mut violations = Vec::new();

        if candidate.valid_ratio < self.min_valid_ratio {
            violations.push(Violation::ValidRatio);
        }
        if candidate.point_count() < self.min_points {
            violations.push(Violation::PointCount);
        }
        if let Some(roll) = candidate.roll() {
            if roll.abs() > self.max_roll_degrees {
                violations.push(Violation::Roll);
            }
        }
        if let Some(mouth) = candidate.mouth_ratio() {
            if mouth > self.max_mouth_ratio {
                violations.push(Violation::MouthOpen);
            }
        }
        if let Some(rms) = candidate.landmark_rms {
            if rms > self.max_landmark_rms {
                violations.push(Violation::LandmarkRms);
            }
        }
        if let Some(delta) = candidate.pose_delta {
            if delta > self.max_pose_delta_degrees {
                violations.push(Violation::PoseDelta);
            }
        }
        if let Some(delta) = candidate.centroid_delta {
            if delta > self.max_centroid_delta {
                violations.push(Violation::CentroidDelta);
            }
        }

        violations
    }

    pub fn accepts(&self, candidate: &FrameCandidate) -> bool {
        self.violations(candidate).is_empty()
    }
}

impl ScoreWeights {
    /// Scalar ranking score. No fixed scale; each factor is monotonic in
    /// its intended direction and absent signals contribute neutrally.
    pub fn score(&self, candidate: &FrameCandidate) -> f32 {
        let validity = ((candidate.valid_ratio - VALID_RATIO_NOISE_FLOOR)
            / (1.0 - VALID_RATIO_NOISE_FLOOR))
            .clamp(0.0, 1.0);

        let landmark_stability = candidate
            .landmark_rms
            .map(half_scale_falloff)
            .unwrap_or(NEUTRAL);

        let temporal_stability = candidate
            .landmark_delta
            .map(half_scale_falloff)
            .unwrap_or(NEUTRAL);

        let roll_stability = candidate
            .roll()
            .map(|roll| (1.0 - roll.abs() / ROLL_ZERO_DEGREES).clamp(0.0, 1.0))
            .unwrap_or(NEUTRAL);

        let point_count = (candidate.point_count() as f32 / POINT_SATURATION).min(1.0);

        self.validity * validity
            + self.landmark_stability * landmark_stability
            + self.temporal_stability * temporal_stability
            + self.roll_stability * roll_stability
            + self.point_count * point_count
    }
}

/// 1.0 at zero displacement, 0.5 at `LANDMARK_HALF_SCALE`, monotonic down.
fn half_scale_falloff(displacement: f32) -> f32 {
    1.0 / (1.0 + displacement.max(0.0) / LANDMARK_HALF_SCALE)
}
