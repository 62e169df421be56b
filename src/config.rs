use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Elliptical region-of-interest mask over the depth grid, in fractions of
/// the frame size. Centered slightly above frame center so the mask covers
/// the face and cuts background and shoulders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiEllipse {
    pub center_x: f32,
    pub center_y: f32,
    pub radius_x: f32,
    pub radius_y: f32,
}

impl Default for RoiEllipse {
    fn default() -> Self {
        Self {
            center_x: 0.5,
            center_y: 0.45,
            radius_x: 0.42,
            radius_y: 0.52,
        }
    }
}

impl RoiEllipse {
    /// Whether pixel (x, y) of a width x height grid falls inside the mask.
    pub fn contains(&self, x: usize, y: usize, width: usize, height: usize) -> bool {
        let cx = self.center_x * width as f32;
        let cy = self.center_y * height as f32;
        let rx = self.radius_x * width as f32;
        let ry = self.radius_y * height as f32;

        if rx <= 0.0 || ry <= 0.0 {
            return false;
        }

        let nx = (x as f32 - cx) / rx;
        let ny = (y as f32 - cy) / ry;

        nx * nx + ny * ny <= 1.0
    }
}

/// Configuration of depth back-projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Grid step in both axes; never project every pixel.
    pub stride: usize,
    // Clip at this minimum distance (meter)
    pub min_depth: f32,
    // Clip at this maximum distance (meter)
    pub max_depth: f32,
    /// Region-of-interest mask; samples outside are not counted.
    pub roi: Option<RoiEllipse>,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            stride: 2,
            min_depth: 0.15,
            max_depth: 1.2,
            roi: Some(RoiEllipse::default()),
        }
    }
}

/// Per-candidate acceptance limits. A candidate passes when it violates
/// none of them; missing analysis fields are neutral, not disqualifying.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptanceThresholds {
    pub min_valid_ratio: f32,
    pub min_points: usize,
    pub max_roll_degrees: f32,
    pub max_mouth_ratio: f32,
    pub max_landmark_rms: f32,
    pub max_pose_delta_degrees: f32,
    pub max_centroid_delta: f32,
}

impl Default for AcceptanceThresholds {
    fn default() -> Self {
        Self {
            min_valid_ratio: 0.06,
            min_points: 6_000,
            max_roll_degrees: 15.0,
            max_mouth_ratio: 0.07,
            max_landmark_rms: 0.05,
            max_pose_delta_degrees: 12.0,
            max_centroid_delta: 0.04,
        }
    }
}

/// Weights of the per-factor quality score. Must sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub validity: f32,
    pub landmark_stability: f32,
    pub temporal_stability: f32,
    pub roll_stability: f32,
    pub point_count: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            validity: 0.35,
            landmark_stability: 0.30,
            temporal_stability: 0.20,
            roll_stability: 0.10,
            point_count: 0.05,
        }
    }
}

impl ScoreWeights {
    pub fn is_normalized(&self) -> bool {
        let sum = self.validity
            + self.landmark_stability
            + self.temporal_stability
            + self.roll_stability
            + self.point_count;

        (sum - 1.0).abs() <= 1e-3
    }
}

/// Continuous yaw-bucket selection: top-N per bucket, padded from the
/// remaining pool up to `total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YawBucketSelection {
    pub left_min: f32,
    pub left_max: f32,
    pub center_half_width: f32,
    pub right_min: f32,
    pub right_max: f32,
    pub center_take: usize,
    pub side_take: usize,
    pub total: usize,
}

impl Default for YawBucketSelection {
    fn default() -> Self {
        Self {
            left_min: -25.0,
            left_max: -10.0,
            center_half_width: 8.0,
            right_min: 10.0,
            right_max: 25.0,
            center_take: 3,
            side_take: 2,
            total: 8,
        }
    }
}

/// Discrete-pose classification limits (degrees).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseSelection {
    /// |yaw| below this is a frontal family pose (Front/Up/Down).
    pub front_max_yaw: f32,
    /// |pitch| at or below this within the frontal family is Front.
    pub front_max_pitch: f32,
    /// |yaw| beyond this is a full side turn (Left/Right).
    pub side_min_yaw: f32,
}

impl Default for PoseSelection {
    fn default() -> Self {
        Self {
            front_max_yaw: 15.0,
            front_max_pitch: 20.0,
            side_min_yaw: 70.0,
        }
    }
}

/// Which frame-selection strategy a capture mode runs.
///
/// Both are deterministic over the same candidate list; the capture mode
/// picks one instead of the pipeline guessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SelectionPolicy {
    YawBuckets(YawBucketSelection),
    DiscretePoses(PoseSelection),
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy::YawBuckets(YawBucketSelection::default())
    }
}

/// Configuration of one capture run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture window wall-clock duration.
    pub window: Duration,
    /// Sampling cadence.
    pub tick_interval: Duration,
    /// Assembled clouds below this many points fail the scan.
    pub min_cloud_points: usize,
    /// Hard cap on total points in the assembled cloud.
    pub point_budget: usize,
    /// Retain per-candidate color frames so selected poses can be exported
    /// as JPEG. Only useful with the discrete-pose policy.
    pub keep_pose_images: bool,
    pub jpeg_quality: u8,

    pub projector: ProjectorConfig,
    pub acceptance: AcceptanceThresholds,
    pub weights: ScoreWeights,
    pub selection: SelectionPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(8),
            tick_interval: Duration::from_millis(250),
            min_cloud_points: 1_000,
            point_budget: 500_000,
            keep_pose_images: false,
            jpeg_quality: 85,
            projector: ProjectorConfig::default(),
            acceptance: AcceptanceThresholds::default(),
            weights: ScoreWeights::default(),
            selection: SelectionPolicy::default(),
        }
    }
}

impl CaptureConfig {
    /// Short single-sweep capture with continuous yaw buckets.
    pub fn quick() -> Self {
        Self {
            window: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Long guided capture collecting one frame per discrete pose,
    /// keeping color frames for per-pose JPEG export.
    pub fn guided() -> Self {
        Self {
            window: Duration::from_secs(20),
            keep_pose_images: true,
            selection: SelectionPolicy::DiscretePoses(PoseSelection::default()),
            ..Self::default()
        }
    }
}

/// Configuration of the upload/poll state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Server base URL, e.g. `https://scans.example.com`.
    pub base_url: String,
    /// Request-level timeout on the multipart POST.
    pub upload_timeout: Duration,
    /// Fixed status-poll cadence; also the only retry mechanism.
    pub poll_interval: Duration,
    /// Give up polling after this much wall-clock time.
    pub poll_deadline: Duration,
    pub unit_scale: f32,
    pub units: String,
    /// Directory receiving the local fallback file on upload failure.
    pub fallback_dir: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            upload_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
            poll_deadline: Duration::from_secs(600),
            unit_scale: 1.0,
            units: "meters".to_string(),
            fallback_dir: std::env::temp_dir(),
        }
    }
}
