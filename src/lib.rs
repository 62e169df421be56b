mod analysis;
mod cancel;
mod capture;
mod config;
mod frame;
mod pipeline;
mod snapshot;
mod upload;

use thiserror::Error;

pub use analysis::{landmark_rms, FaceAnalysis, LandmarkAnalyzer, LandmarkPoint};
pub use cancel::{cancellation, CancelHandle};
pub use capture::{
    CaptureError, CapturePhase, CaptureScheduler, CapturedPoseFrame, ScanResult, ViolationTally,
};
pub use config::{
    AcceptanceThresholds, CaptureConfig, PoseSelection, ProjectorConfig, RoiEllipse, ScoreWeights,
    SelectionPolicy, UploadConfig, YawBucketSelection,
};
pub use frame::{CameraIntrinsics, ColorFrame, ColorSpace, DepthFrame};
pub use pipeline::cloud::{PlyError, PointCloud};
pub use pipeline::projector::{project, PointRecord, Projection};
pub use pipeline::quality::{FrameCandidate, Violation};
pub use pipeline::selector::{select, Pose, Selected};
pub use snapshot::{FrameSnapshot, SnapshotStore};
pub use upload::{
    run_scan_upload, ScanClient, ScanStatus, ScanUploadState, UploadError, UploadFailure,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Ply(#[from] PlyError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
