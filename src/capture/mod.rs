use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::analysis::{landmark_rms, FaceAnalysis, LandmarkAnalyzer, LandmarkPoint};
use crate::cancel;
use crate::config::CaptureConfig;
use crate::frame::ColorFrame;
use crate::pipeline::cloud::PointCloud;
use crate::pipeline::projector::project;
use crate::pipeline::quality::{FrameCandidate, Violation};
use crate::pipeline::selector::{select, Pose, Selected};
use crate::snapshot::SnapshotStore;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CaptureError {
    /// The whole capture window produced no usable sample.
    #[error("no usable frames were captured")]
    NoFrames,
    /// The selected candidates together hold too few points.
    #[error("captured geometry is too sparse: {0} points")]
    SparsePoints(usize),
    /// The assembled cloud fell below the minimum after budgeting.
    #[error("assembled cloud has too few points: {0}")]
    InsufficientPoints(usize),
}

/// Where a capture run currently is. Published for progress display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    Sampling,
    Finalizing,
}

/// One selected pose frame, exported as JPEG for the upload form.
#[derive(Debug, Clone)]
pub struct CapturedPoseFrame {
    pub pose: Pose,
    pub jpeg: Vec<u8>,
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub timestamp_ms: u64,
}

/// Count of failed acceptance predicates across all candidates of a run.
///
/// Callers derive user-facing hints ("hold still", "move closer") from the
/// dominant violation; the tally itself stays message-free.
#[derive(Debug, Clone, Default)]
pub struct ViolationTally {
    counts: HashMap<Violation, usize>,
}

impl ViolationTally {
    pub fn record(&mut self, violation: Violation) {
        *self.counts.entry(violation).or_insert(0) += 1;
    }

    pub fn count(&self, violation: Violation) -> usize {
        self.counts.get(&violation).copied().unwrap_or(0)
    }

    /// The predicate that failed most often, ties broken arbitrarily.
    pub fn most_common(&self) -> Option<(Violation, usize)> {
        self.counts
            .iter()
            .max_by_key(|(_, count)| *count)
            .map(|(violation, count)| (*violation, *count))
    }
}

/// Result of a completed capture run.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub cloud: PointCloud,
    pub pose_frames: Vec<CapturedPoseFrame>,
    pub candidates_seen: usize,
    pub candidates_accepted: usize,
    pub violations: ViolationTally,
}

/// Pose observation carried between ticks for inter-frame deltas.
struct PreviousObservation {
    yaw: f32,
    pitch: f32,
    roll: f32,
    landmarks: Vec<LandmarkPoint>,
    centroid: LandmarkPoint,
}

/// Runs the timed sampling loop over the snapshot store and turns the
/// collected candidates into an assembled point cloud.
///
/// The loop is bounded by wall clock, not tick count: a tick that finds
/// no usable frame still consumes its slot and the loop continues until
/// the deadline or cancellation.
pub struct CaptureScheduler {
    store: Arc<SnapshotStore>,
    analyzer: Option<Arc<dyn LandmarkAnalyzer>>,
    config: CaptureConfig,
    phase_tx: Option<watch::Sender<CapturePhase>>,
}

impl CaptureScheduler {
    pub fn new(store: Arc<SnapshotStore>, config: CaptureConfig) -> Self {
        if !config.weights.is_normalized() {
            warn!("score weights do not sum to 1; ranking will be skewed");
        }

        Self {
            store,
            analyzer: None,
            config,
            phase_tx: None,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn LandmarkAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Publish phase transitions on the given channel.
    pub fn with_phase_channel(mut self, tx: watch::Sender<CapturePhase>) -> Self {
        self.phase_tx = Some(tx);
        self
    }

    fn set_phase(&self, phase: CapturePhase) {
        if let Some(tx) = &self.phase_tx {
            let _ = tx.send(phase);
        }
    }

    /// Run one capture window to completion or cancellation.
    ///
    /// Cancellation finalizes whatever was collected; it only surfaces as
    /// [`CaptureError::NoFrames`] when nothing was.
    pub async fn run(
        &self,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<ScanResult, CaptureError> {
        let deadline = tokio::time::Instant::now() + self.config.window;
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut candidates: Vec<FrameCandidate> = Vec::new();
        let mut reference: Option<Vec<LandmarkPoint>> = None;
        let mut previous: Option<PreviousObservation> = None;

        self.set_phase(CapturePhase::Sampling);
        info!(
            "sampling for {:?} every {:?}",
            self.config.window, self.config.tick_interval
        );

        loop {
            if *cancel_rx.borrow() {
                info!("capture cancelled after {} candidates", candidates.len());
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = cancel::cancelled(&mut cancel_rx) => {
                    info!("capture cancelled after {} candidates", candidates.len());
                    break;
                }
                _ = interval.tick() => {
                    // tick work runs inline, so ticks never overlap and the
                    // snapshot store is read once per tick
                    match self.sample_tick(&mut reference, &mut previous) {
                        Some(candidate) => {
                            debug!(
                                "tick: {} points, valid ratio {:.3}",
                                candidate.point_count(),
                                candidate.valid_ratio
                            );
                            candidates.push(candidate);
                        }
                        None => debug!("tick: no usable frame"),
                    }
                }
            }
        }

        self.set_phase(CapturePhase::Finalizing);
        let result = self.finalize(candidates);
        self.set_phase(CapturePhase::Idle);
        result
    }

    /// One sampling tick: snapshot, project, analyze, build a candidate.
    fn sample_tick(
        &self,
        reference: &mut Option<Vec<LandmarkPoint>>,
        previous: &mut Option<PreviousObservation>,
    ) -> Option<FrameCandidate> {
        let snapshot = self.store.latest()?;
        let projection = project(
            &snapshot.depth,
            &snapshot.color,
            &snapshot.intrinsics,
            &self.config.projector,
        )?;

        let analysis = self
            .analyzer
            .as_deref()
            .and_then(|analyzer| analyzer.analyze(&snapshot.color));

        let (rms, pose_delta, landmark_delta, centroid_delta) =
            analysis_deltas(analysis.as_ref(), reference, previous);

        Some(FrameCandidate {
            valid_ratio: projection.valid_ratio(),
            points: projection.points,
            total_samples: projection.total_samples,
            analysis,
            landmark_rms: rms,
            pose_delta,
            landmark_delta,
            centroid_delta,
            color: self.config.keep_pose_images.then(|| snapshot.color.clone()),
            timestamp_ms: snapshot.depth.timestamp_ms,
        })
    }

    fn finalize(&self, candidates: Vec<FrameCandidate>) -> Result<ScanResult, CaptureError> {
        if candidates.is_empty() {
            return Err(CaptureError::NoFrames);
        }

        let mut violations = ViolationTally::default();
        let mut accepted: Vec<&FrameCandidate> = Vec::new();

        for candidate in &candidates {
            let failed = self.config.acceptance.violations(candidate);
            if failed.is_empty() {
                accepted.push(candidate);
            }
            for violation in failed {
                violations.record(violation);
            }
        }

        let candidates_accepted = accepted.len();

        // an over-strict filter must not kill the scan outright
        let pool: Vec<&FrameCandidate> = if accepted.is_empty() {
            warn!("acceptance filter rejected every candidate; selecting from all");
            candidates.iter().collect()
        } else {
            accepted
        };

        let scores: Vec<f32> = pool
            .iter()
            .map(|candidate| self.config.weights.score(candidate))
            .collect();
        let selected = select(&pool, &scores, &self.config.selection);

        let available: usize = selected
            .iter()
            .map(|s| pool[s.index].point_count())
            .sum();
        if available < self.config.min_cloud_points {
            return Err(CaptureError::SparsePoints(available));
        }

        let cloud = PointCloud::assemble(
            selected.iter().map(|s| pool[s.index].points.as_slice()),
            self.config.point_budget,
        );
        if cloud.len() < self.config.min_cloud_points {
            return Err(CaptureError::InsufficientPoints(cloud.len()));
        }

        let pose_frames = self.export_pose_frames(&pool, &selected);

        info!(
            "finalized scan: {} of {} candidates selected, {} points",
            selected.len(),
            candidates.len(),
            cloud.len()
        );

        Ok(ScanResult {
            cloud,
            pose_frames,
            candidates_seen: candidates.len(),
            candidates_accepted,
            violations,
        })
    }

    fn export_pose_frames(
        &self,
        pool: &[&FrameCandidate],
        selected: &[Selected],
    ) -> Vec<CapturedPoseFrame> {
        let mut frames = Vec::new();

        for entry in selected {
            let Some(pose) = entry.pose else { continue };
            let candidate = pool[entry.index];
            let Some(color) = &candidate.color else {
                continue;
            };
            let Some(analysis) = &candidate.analysis else {
                continue;
            };

            match encode_jpeg(color, self.config.jpeg_quality) {
                Some(jpeg) => frames.push(CapturedPoseFrame {
                    pose,
                    jpeg,
                    yaw: analysis.yaw,
                    pitch: analysis.pitch,
                    roll: analysis.roll,
                    timestamp_ms: candidate.timestamp_ms,
                }),
                None => warn!("failed to encode {} pose image", pose.name()),
            }
        }

        frames
    }
}

/// Stability metrics of the current analysis against the reference frame
/// and the previously analyzed frame. Updates both as a side effect.
fn analysis_deltas(
    analysis: Option<&FaceAnalysis>,
    reference: &mut Option<Vec<LandmarkPoint>>,
    previous: &mut Option<PreviousObservation>,
) -> (Option<f32>, Option<f32>, Option<f32>, Option<f32>) {
    let Some(analysis) = analysis else {
        return (None, None, None, None);
    };

    if reference.is_none() && !analysis.landmarks.is_empty() {
        *reference = Some(analysis.landmarks.clone());
    }

    let rms = reference
        .as_deref()
        .and_then(|reference| landmark_rms(&analysis.landmarks, reference));

    let (pose_delta, landmark_delta, centroid_delta) = match previous.as_ref() {
        Some(prev) => (
            Some(
                (analysis.yaw - prev.yaw)
                    .abs()
                    .max((analysis.pitch - prev.pitch).abs())
                    .max((analysis.roll - prev.roll).abs()),
            ),
            landmark_rms(&analysis.landmarks, &prev.landmarks),
            Some(analysis.centroid.distance_to(&prev.centroid)),
        ),
        None => (None, None, None),
    };

    *previous = Some(PreviousObservation {
        yaw: analysis.yaw,
        pitch: analysis.pitch,
        roll: analysis.roll,
        landmarks: analysis.landmarks.clone(),
        centroid: analysis.centroid,
    });

    (rms, pose_delta, landmark_delta, centroid_delta)
}

/// JPEG-encode a color frame for the per-pose upload parts.
fn encode_jpeg(frame: &ColorFrame, quality: u8) -> Option<Vec<u8>> {
    if frame.width == 0 || frame.height == 0 {
        return None;
    }

    let rgb: image::RgbImage = image::ImageBuffer::from_raw(
        frame.width as u32,
        frame.height as u32,
        frame.to_rgb8(),
    )?;

    let mut out = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut out);
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);

    rgb.write_with_encoder(encoder).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_reports_the_dominant_violation() {
        let mut tally = ViolationTally::default();
        tally.record(Violation::Roll);
        tally.record(Violation::ValidRatio);
        tally.record(Violation::Roll);

        assert_eq!(tally.most_common(), Some((Violation::Roll, 2)));
        assert_eq!(tally.count(Violation::ValidRatio), 1);
        assert_eq!(tally.count(Violation::MouthOpen), 0);
    }

    #[test]
    fn deltas_start_neutral_and_track_motion() {
        let mut reference = None;
        let mut previous = None;

        let first = FaceAnalysis {
            landmarks: vec![LandmarkPoint { x: 0.5, y: 0.5 }],
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            mouth_ratio: 0.0,
            interocular: 0.1,
            centroid: LandmarkPoint { x: 0.5, y: 0.5 },
        };

        let (rms, pose_delta, landmark_delta, centroid_delta) =
            analysis_deltas(Some(&first), &mut reference, &mut previous);

        // first analyzed frame is its own reference, with no previous frame
        assert_eq!(rms, Some(0.0));
        assert_eq!(pose_delta, None);
        assert_eq!(landmark_delta, None);
        assert_eq!(centroid_delta, None);

        let second = FaceAnalysis {
            landmarks: vec![LandmarkPoint { x: 0.6, y: 0.5 }],
            yaw: 10.0,
            pitch: -4.0,
            roll: 1.0,
            centroid: LandmarkPoint { x: 0.6, y: 0.5 },
            ..first
        };

        let (rms, pose_delta, landmark_delta, centroid_delta) =
            analysis_deltas(Some(&second), &mut reference, &mut previous);

        assert!(rms.unwrap() > 0.0);
        assert_eq!(pose_delta, Some(10.0));
        assert!(landmark_delta.unwrap() > 0.0);
        assert!(centroid_delta.unwrap() > 0.0);
    }

    #[test]
    fn missing_analysis_leaves_tracking_untouched() {
        let mut reference = Some(vec![LandmarkPoint { x: 0.1, y: 0.1 }]);
        let mut previous = None;

        let deltas = analysis_deltas(None, &mut reference, &mut previous);

        assert_eq!(deltas, (None, None, None, None));
        assert!(reference.is_some());
        assert!(previous.is_none());
    }
}
