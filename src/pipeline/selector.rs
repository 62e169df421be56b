use std::collections::HashSet;

use log::warn;

use crate::config::{PoseSelection, SelectionPolicy, YawBucketSelection};
use crate::pipeline::quality::FrameCandidate;

/// Discrete head pose bucket. Ordering is the fixed output order of the
/// discrete-pose policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pose {
    Front,
    Left,
    Right,
    Down,
    Up,
}

impl Pose {
    pub const ALL: [Pose; 5] = [Pose::Front, Pose::Left, Pose::Right, Pose::Down, Pose::Up];

    /// Yaw a perfectly captured frame of this pose would have.
    pub fn ideal_yaw(&self) -> f32 {
        match self {
            Pose::Left => -75.0,
            Pose::Right => 75.0,
            Pose::Front | Pose::Down | Pose::Up => 0.0,
        }
    }

    /// Wire name used for per-pose image form parts.
    pub fn name(&self) -> &'static str {
        match self {
            Pose::Front => "front",
            Pose::Left => "left",
            Pose::Right => "right",
            Pose::Down => "down",
            Pose::Up => "up",
        }
    }

    /// Classify a head rotation into at most one pose. Yaw dominates:
    /// full side turns are Left/Right regardless of pitch, near-frontal
    /// yaw splits into Front/Down/Up by pitch, everything between the
    /// frontal and side ranges is a transition and stays unclassified.
    pub fn classify(yaw: f32, pitch: f32, config: &PoseSelection) -> Option<Pose> {
        if yaw < -config.side_min_yaw {
            return Some(Pose::Left);
        }
        if yaw > config.side_min_yaw {
            return Some(Pose::Right);
        }
        if yaw.abs() < config.front_max_yaw {
            if pitch < -config.front_max_pitch {
                return Some(Pose::Down);
            }
            if pitch > config.front_max_pitch {
                return Some(Pose::Up);
            }
            return Some(Pose::Front);
        }

        None
    }
}

/// One selected candidate: its index into the candidate slice and, for the
/// discrete-pose policy, the pose it was selected for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selected {
    pub index: usize,
    pub pose: Option<Pose>,
}

/// Pick a bounded, pose-diverse subset of the candidates.
///
/// `scores` must be parallel to `candidates`. Both policies are
/// deterministic: candidates tie-break by first-seen order.
pub fn select(
    candidates: &[&FrameCandidate],
    scores: &[f32],
    policy: &SelectionPolicy,
) -> Vec<Selected> {
    debug_assert_eq!(candidates.len(), scores.len());

    match policy {
        SelectionPolicy::YawBuckets(config) => select_yaw_buckets(candidates, scores, config),
        SelectionPolicy::DiscretePoses(config) => select_discrete(candidates, scores, config),
    }
}

/// Stable ranking: descending score, ties in first-seen order.
fn rank_by_score(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    order
}

fn select_yaw_buckets(
    candidates: &[&FrameCandidate],
    scores: &[f32],
    config: &YawBucketSelection,
) -> Vec<Selected> {
    let order = rank_by_score(scores);

    let mut left = Vec::new();
    let mut center = Vec::new();
    let mut right = Vec::new();

    for &index in &order {
        let Some(yaw) = candidates[index].yaw() else {
            continue;
        };

        if yaw.abs() <= config.center_half_width && center.len() < config.center_take {
            center.push(index);
        } else if (config.left_min..=config.left_max).contains(&yaw)
            && left.len() < config.side_take
        {
            left.push(index);
        } else if (config.right_min..=config.right_max).contains(&yaw)
            && right.len() < config.side_take
        {
            right.push(index);
        }
    }

    let mut selected: Vec<usize> = Vec::new();
    selected.extend(&center);
    selected.extend(&left);
    selected.extend(&right);

    // pad short buckets from the remaining pool, best-first, skipping
    // candidates that duplicate an already selected metric tuple
    let mut seen_keys: HashSet<_> = selected
        .iter()
        .map(|&index| candidates[index].metric_key())
        .collect();

    for &index in &order {
        if selected.len() >= config.total {
            break;
        }
        if selected.contains(&index) {
            continue;
        }
        if !seen_keys.insert(candidates[index].metric_key()) {
            continue;
        }
        selected.push(index);
    }

    selected
        .into_iter()
        .take(config.total)
        .map(|index| Selected { index, pose: None })
        .collect()
}

fn select_discrete(
    candidates: &[&FrameCandidate],
    scores: &[f32],
    config: &PoseSelection,
) -> Vec<Selected> {
    struct Claim {
        index: usize,
        yaw_distance: f32,
        score: f32,
    }

    // slot order matches Pose::ALL and the enum discriminants
    let mut best: [Option<Claim>; 5] = [None, None, None, None, None];

    for (index, candidate) in candidates.iter().enumerate() {
        let (Some(yaw), Some(pitch)) = (candidate.yaw(), candidate.pitch()) else {
            continue;
        };
        let Some(pose) = Pose::classify(yaw, pitch, config) else {
            continue;
        };

        let claim = Claim {
            index,
            yaw_distance: (yaw - pose.ideal_yaw()).abs(),
            score: scores[index],
        };
        let slot = &mut best[pose as usize];

        // closest to the ideal yaw wins; score breaks distance ties;
        // first-seen order breaks exact ties
        let wins = match slot.as_ref() {
            None => true,
            Some(current) => {
                claim.yaw_distance < current.yaw_distance
                    || (claim.yaw_distance == current.yaw_distance && claim.score > current.score)
            }
        };

        if wins {
            *slot = Some(claim);
        }
    }

    let mut selected = Vec::new();

    for (pose, claim) in Pose::ALL.iter().zip(best.iter()) {
        match claim {
            Some(claim) => selected.push(Selected {
                index: claim.index,
                pose: Some(*pose),
            }),
            None => warn!("no qualifying frame for pose {}", pose.name()),
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FaceAnalysis, LandmarkPoint};

    fn candidate(yaw: Option<f32>, pitch: f32, points: usize) -> FrameCandidate {
        FrameCandidate {
            points: vec![
                crate::pipeline::projector::PointRecord {
                    x: 0.0,
                    y: 0.0,
                    z: 0.5,
                    r: 0,
                    g: 0,
                    b: 0,
                };
                points
            ],
            total_samples: points,
            valid_ratio: 0.4,
            analysis: yaw.map(|yaw| FaceAnalysis {
                landmarks: vec![LandmarkPoint { x: 0.5, y: 0.5 }],
                yaw,
                pitch,
                roll: 0.0,
                mouth_ratio: 0.02,
                interocular: 0.1,
                centroid: LandmarkPoint { x: 0.5, y: 0.5 },
            }),
            landmark_rms: None,
            pose_delta: None,
            landmark_delta: None,
            centroid_delta: None,
            color: None,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn classification_is_yaw_dominant() {
        let config = PoseSelection::default();

        assert_eq!(Pose::classify(0.0, 0.0, &config), Some(Pose::Front));
        assert_eq!(Pose::classify(-80.0, 30.0, &config), Some(Pose::Left));
        assert_eq!(Pose::classify(80.0, -30.0, &config), Some(Pose::Right));
        assert_eq!(Pose::classify(5.0, -30.0, &config), Some(Pose::Down));
        assert_eq!(Pose::classify(5.0, 30.0, &config), Some(Pose::Up));
        // transitional yaw between frontal and side ranges
        assert_eq!(Pose::classify(40.0, 0.0, &config), None);
    }

    #[test]
    fn discrete_selection_returns_fixed_pose_order() {
        let owned = [
            candidate(Some(78.0), 0.0, 100),  // Right
            candidate(Some(-85.0), 0.0, 100), // Left
            candidate(Some(1.0), 0.0, 100),   // Front
        ];
        let candidates: Vec<&FrameCandidate> = owned.iter().collect();
        let scores = vec![0.5; candidates.len()];

        let policy = SelectionPolicy::DiscretePoses(PoseSelection::default());
        let selected = select(&candidates, &scores, &policy);

        let poses: Vec<_> = selected.iter().map(|s| s.pose.unwrap()).collect();
        assert_eq!(poses, vec![Pose::Front, Pose::Left, Pose::Right]);
        assert_eq!(selected[0].index, 2);
        assert_eq!(selected[1].index, 1);
        assert_eq!(selected[2].index, 0);
    }

    #[test]
    fn discrete_selection_prefers_ideal_yaw() {
        let owned = [
            candidate(Some(-88.0), 0.0, 100), // 13 degrees from ideal -75
            candidate(Some(-74.0), 0.0, 100), // 1 degree from ideal
        ];
        let candidates: Vec<&FrameCandidate> = owned.iter().collect();
        let scores = vec![0.9, 0.1]; // score must not override yaw distance

        let policy = SelectionPolicy::DiscretePoses(PoseSelection::default());
        let selected = select(&candidates, &scores, &policy);

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].index, 1);
    }

    #[test]
    fn yaw_buckets_cap_the_total() {
        let owned: Vec<FrameCandidate> = (0..20)
            .map(|i| candidate(Some((i as f32 - 10.0) * 2.0), 0.0, 100 + i))
            .collect();
        let candidates: Vec<&FrameCandidate> = owned.iter().collect();
        let scores: Vec<f32> = (0..20).map(|i| i as f32 / 20.0).collect();

        let config = YawBucketSelection::default();
        let policy = SelectionPolicy::YawBuckets(config.clone());
        let selected = select(&candidates, &scores, &policy);

        assert!(selected.len() <= config.total);
        assert!(selected.iter().all(|s| s.pose.is_none()));

        // no candidate picked twice
        let mut indices: Vec<_> = selected.iter().map(|s| s.index).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), selected.len());
    }

    #[test]
    fn yaw_buckets_pad_when_buckets_are_short() {
        // only two candidates have a yaw; the rest are face-less but distinct
        let owned: Vec<FrameCandidate> = vec![
            candidate(Some(0.0), 0.0, 100),
            candidate(Some(-15.0), 0.0, 200),
            candidate(None, 0.0, 300),
            candidate(None, 0.0, 400),
        ];
        let candidates: Vec<&FrameCandidate> = owned.iter().collect();
        let scores = vec![0.9, 0.8, 0.7, 0.6];

        let policy = SelectionPolicy::YawBuckets(YawBucketSelection::default());
        let selected = select(&candidates, &scores, &policy);

        assert_eq!(selected.len(), 4);
    }

    #[test]
    fn selection_is_deterministic() {
        let owned: Vec<FrameCandidate> = (0..10)
            .map(|i| candidate(Some((i as f32) * 9.0 - 45.0), 0.0, 1_000))
            .collect();
        let candidates: Vec<&FrameCandidate> = owned.iter().collect();
        let scores = vec![0.5; 10]; // all tied: first-seen order decides

        for policy in [
            SelectionPolicy::YawBuckets(YawBucketSelection::default()),
            SelectionPolicy::DiscretePoses(PoseSelection::default()),
        ] {
            let first = select(&candidates, &scores, &policy);
            let second = select(&candidates, &scores, &policy);
            assert_eq!(first, second);
        }
    }
}
