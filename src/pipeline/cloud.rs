use std::fmt::Write as _;

use thiserror::Error;

use crate::pipeline::projector::PointRecord;

const PLY_MAGIC: &str = "ply";
const PLY_FORMAT: &str = "format ascii 1.0";
const PLY_PROPERTIES: [&str; 6] = [
    "property float x",
    "property float y",
    "property float z",
    "property uchar red",
    "property uchar green",
    "property uchar blue",
];
const PLY_END_HEADER: &str = "end_header";

#[derive(Error, Debug)]
pub enum PlyError {
    #[error("malformed header: {0}")]
    Header(String),
    #[error("vertex count mismatch: header declares {declared}, body has {found}")]
    VertexCount { declared: usize, found: usize },
    #[error("malformed vertex line {line}")]
    Vertex { line: usize },
}

/// Assembled point cloud, bounded by the capture's point budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<PointRecord>,
}

impl PointCloud {
    /// Concatenate candidate point lists in selection order, truncating
    /// mid-candidate once `budget` points are reached. Truncation keeps
    /// the prefix of the candidate that crosses the budget, so the
    /// assembled count is exactly `min(budget, total available)`.
    pub fn assemble<'a, I>(parts: I, budget: usize) -> PointCloud
    where
        I: IntoIterator<Item = &'a [PointRecord]>,
    {
        let mut points = Vec::new();

        for part in parts {
            if points.len() >= budget {
                break;
            }

            let remaining = budget - points.len();
            points.extend_from_slice(&part[..part.len().min(remaining)]);
        }

        PointCloud { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Serialize to the ASCII point format: the fixed header declaring the
    /// encoding, vertex count and six per-vertex properties, then one
    /// `x y z red green blue` line per point, newline-terminated.
    ///
    /// Float fields use the shortest round-trip decimal form, so
    /// serialize -> parse -> serialize is byte-identical.
    pub fn to_ply(&self) -> String {
        let mut out = String::with_capacity(128 + self.points.len() * 24);

        out.push_str(PLY_MAGIC);
        out.push('\n');
        out.push_str(PLY_FORMAT);
        out.push('\n');
        let _ = writeln!(out, "element vertex {}", self.points.len());
        for property in PLY_PROPERTIES {
            out.push_str(property);
            out.push('\n');
        }
        out.push_str(PLY_END_HEADER);
        out.push('\n');

        for p in &self.points {
            let _ = writeln!(out, "{} {} {} {} {} {}", p.x, p.y, p.z, p.r, p.g, p.b);
        }

        out
    }

    /// Parse the exact shape [`PointCloud::to_ply`] emits.
    pub fn parse_ply(text: &str) -> Result<PointCloud, PlyError> {
        let mut lines = text.lines();

        expect_line(&mut lines, PLY_MAGIC)?;
        expect_line(&mut lines, PLY_FORMAT)?;

        let declared = match lines.next() {
            Some(line) => line
                .strip_prefix("element vertex ")
                .and_then(|count| count.parse::<usize>().ok())
                .ok_or_else(|| PlyError::Header(format!("bad element line `{line}`")))?,
            None => return Err(PlyError::Header("missing element line".to_string())),
        };

        for property in PLY_PROPERTIES {
            expect_line(&mut lines, property)?;
        }
        expect_line(&mut lines, PLY_END_HEADER)?;

        let mut points = Vec::with_capacity(declared);

        for (number, line) in lines.enumerate() {
            let mut fields = line.split(' ');
            let mut float = || -> Option<f32> { fields.next()?.parse().ok() };

            let (x, y, z) = (float(), float(), float());
            let mut byte = || -> Option<u8> { fields.next()?.parse().ok() };
            let (r, g, b) = (byte(), byte(), byte());

            match (x, y, z, r, g, b, fields.next()) {
                (Some(x), Some(y), Some(z), Some(r), Some(g), Some(b), None) => {
                    points.push(PointRecord { x, y, z, r, g, b });
                }
                _ => return Err(PlyError::Vertex { line: number + 1 }),
            }
        }

        if points.len() != declared {
            return Err(PlyError::VertexCount {
                declared,
                found: points.len(),
            });
        }

        Ok(PointCloud { points })
    }
}

fn expect_line(lines: &mut std::str::Lines<'_>, expected: &str) -> Result<(), PlyError> {
    match lines.next() {
        Some(line) if line == expected => Ok(()),
        Some(line) => Err(PlyError::Header(format!(
            "expected `{expected}`, found `{line}`"
        ))),
        None => Err(PlyError::Header(format!(
            "expected `{expected}`, found end of input"
        ))),
    }
}
