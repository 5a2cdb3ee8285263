//! Engineered face descriptor.
//!
//! Encodes one detector result into a fixed 128-value vector of normalized
//! geometry, pose and expression scalars. This is NOT a learned identity
//! embedding: two different people with similar pose and framing can score
//! high, and the same person photographed differently can score low.

use crate::similarity::{self, SimilarityError};
use crate::types::{ContourKind, DetectedFace, LandmarkKind, Point};
use serde::{Deserialize, Serialize};

// --- Named constants ---
/// Length of every feature vector.
pub const FEATURE_DIM: usize = 128;
/// Pixel coordinates are assumed sub-1000 scale. Larger values are not clamped.
const COORD_SCALE: f64 = 1000.0;
/// Euler angles in degrees map to roughly [-1, 1].
const ANGLE_SCALE: f64 = 180.0;
/// Values appended per contour: first, middle and last point.
const CONTOUR_VALUES: usize = 6;

/// Fixed-length numeric encoding of one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    /// Wrap raw values without enforcing the dimension.
    ///
    /// Vectors produced by [`FeatureVectorBuilder`] are always [`FEATURE_DIM`] long;
    /// anything else is rejected by [`similarity`](Self::similarity).
    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1]; 0 when either vector has zero norm.
    pub fn similarity(&self, other: &FeatureVector) -> Result<f64, SimilarityError> {
        similarity::cosine_similarity(&self.values, &other.values)
    }

    pub fn euclidean_distance(&self, other: &FeatureVector) -> Result<f64, SimilarityError> {
        similarity::euclidean_distance(&self.values, &other.values)
    }
}

/// Builds [`FeatureVector`]s from detector output.
///
/// Layout (84 populated values, zero padding to 128):
///
/// | range  | content                                                |
/// |--------|--------------------------------------------------------|
/// | 0..4   | bounds x, y, width, height / 1000                      |
/// | 4..7   | pitch, yaw, roll / 180                                 |
/// | 7..10  | smiling, left eye open, right eye open probabilities   |
/// | 10..30 | 10 landmarks as (x, y) / 1000, in [`LandmarkKind::ALL`] order |
/// | 30..84 | 9 contours as first/middle/last (x, y) / 1000, in [`ContourKind::ALL`] order |
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureVectorBuilder;

impl FeatureVectorBuilder {
    /// Encode a face. `None` yields the all-zero vector.
    pub fn build(&self, face: Option<&DetectedFace>) -> FeatureVector {
        let mut values = Vec::with_capacity(FEATURE_DIM);

        if let Some(face) = face {
            push_bounds(&mut values, face);
            push_pose(&mut values, face);
            push_classifications(&mut values, face);
            push_landmarks(&mut values, face);
            push_contours(&mut values, face);
        }

        values.resize(FEATURE_DIM, 0.0);
        FeatureVector { values }
    }
}

fn push_bounds(values: &mut Vec<f64>, face: &DetectedFace) {
    let bounds = face.bounds.unwrap_or_default();
    values.extend([
        bounds.x / COORD_SCALE,
        bounds.y / COORD_SCALE,
        bounds.width / COORD_SCALE,
        bounds.height / COORD_SCALE,
    ]);
}

fn push_pose(values: &mut Vec<f64>, face: &DetectedFace) {
    let pose = &face.head_pose;
    for angle in [pose.pitch, pose.yaw, pose.roll] {
        values.push(angle.unwrap_or(0.0) / ANGLE_SCALE);
    }
}

fn push_classifications(values: &mut Vec<f64>, face: &DetectedFace) {
    values.extend([
        face.smiling_probability.unwrap_or(0.0),
        face.left_eye_open_probability.unwrap_or(0.0),
        face.right_eye_open_probability.unwrap_or(0.0),
    ]);
}

fn push_landmarks(values: &mut Vec<f64>, face: &DetectedFace) {
    for kind in LandmarkKind::ALL {
        push_point(values, face.landmark(kind).unwrap_or(Point::new(0.0, 0.0)));
    }
}

fn push_contours(values: &mut Vec<f64>, face: &DetectedFace) {
    for kind in ContourKind::ALL {
        match face.contour(kind) {
            Some(points) if !points.is_empty() => {
                push_point(values, points[0]);
                push_point(values, points[points.len() / 2]);
                push_point(values, points[points.len() - 1]);
            }
            _ => values.extend([0.0; CONTOUR_VALUES]),
        }
    }
}

fn push_point(values: &mut Vec<f64>, point: Point) {
    values.push(point.x / COORD_SCALE);
    values.push(point.y / COORD_SCALE);
}
