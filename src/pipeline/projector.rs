#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::ProjectorConfig;
use crate::frame::{CameraIntrinsics, ColorFrame, DepthFrame};

/// One back-projected depth sample with its sampled color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointRecord {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Result of projecting one synchronized frame pair.
#[derive(Debug, Clone)]
pub struct Projection {
    pub points: Vec<PointRecord>,
    /// Samples visited inside the region of interest, valid or not.
    pub total_samples: usize,
    pub valid_samples: usize,
}

impl Projection {
    pub fn valid_ratio(&self) -> f32 {
        if self.total_samples == 0 {
            0.0
        } else {
            self.valid_samples as f32 / self.total_samples as f32
        }
    }
}

/// Back-project one depth+color pair into camera-space points.
///
/// Walks the depth grid at `config.stride` spacing, masks with the
/// elliptical region of interest, back-projects valid depths through the
/// pinhole model and samples color at the depth coordinate scaled into the
/// color grid. Intrinsics are rescaled to the depth grid before use.
///
/// Returns `None` when a grid is empty, a buffer does not match its
/// declared dimensions, or the intrinsics are degenerate; the caller
/// treats that as "no candidate this tick".
pub fn project(
    depth: &DepthFrame,
    color: &ColorFrame,
    intrinsics: &CameraIntrinsics,
    config: &ProjectorConfig,
) -> Option<Projection> {
    if depth.width == 0 || depth.height == 0 || color.width == 0 || color.height == 0 {
        return None;
    }
    if depth.buffer.len() < depth.width * depth.height {
        return None;
    }
    if color.buffer.len() < color.height * color.stride {
        return None;
    }
    if intrinsics.is_degenerate() {
        return None;
    }

    let stride = config.stride.max(1);
    let scaled = intrinsics.scaled_to(depth.width, depth.height);
    let rows: Vec<usize> = (0..depth.height).step_by(stride).collect();

    #[cfg(feature = "parallel")]
    let row_projections: Vec<RowProjection> = rows
        .par_iter()
        .map(|&py| project_row(py, depth, color, &scaled, config, stride))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let row_projections: Vec<RowProjection> = rows
        .iter()
        .map(|&py| project_row(py, depth, color, &scaled, config, stride))
        .collect();

    let mut projection = Projection {
        points: Vec::new(),
        total_samples: 0,
        valid_samples: 0,
    };

    // rows are produced in grid order, so the merge stays deterministic
    for row in row_projections {
        projection.total_samples += row.total_samples;
        projection.valid_samples += row.points.len();
        projection.points.extend(row.points);
    }

    Some(projection)
}

struct RowProjection {
    points: Vec<PointRecord>,
    total_samples: usize,
}

fn project_row(
    py: usize,
    depth: &DepthFrame,
    color: &ColorFrame,
    scaled: &CameraIntrinsics,
    config: &ProjectorConfig,
    stride: usize,
) -> RowProjection {
    let color_sx = color.width as f32 / depth.width as f32;
    let color_sy = color.height as f32 / depth.height as f32;

    let mut row = RowProjection {
        points: Vec::with_capacity(depth.width / stride + 1),
        total_samples: 0,
    };

    for px in (0..depth.width).step_by(stride) {
        if let Some(roi) = &config.roi {
            if !roi.contains(px, py, depth.width, depth.height) {
                continue;
            }
        }

        row.total_samples += 1;

        let z = depth.get(px, py);

        if !DepthFrame::is_valid(z) || z < config.min_depth || z > config.max_depth {
            continue;
        }

        let (r, g, b) = color.rgb_at(
            (px as f32 * color_sx) as usize,
            (py as f32 * color_sy) as usize,
        );

        row.points.push(PointRecord {
            x: (px as f32 - scaled.cx) / scaled.fx * z,
            y: (py as f32 - scaled.cy) / scaled.fy * z,
            z,
            r,
            g,
            b,
        });
    }

    row
}
