use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A 2D point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Bounding region of a detected face, in pixels. Missing fields read as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Head pose as Euler angles in degrees, roughly [-180, 180] each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    /// Rotation around the horizontal axis (Euler X).
    #[serde(default)]
    pub pitch: Option<f64>,
    /// Rotation around the vertical axis (Euler Y).
    #[serde(default)]
    pub yaw: Option<f64>,
    /// Rotation around the depth axis (Euler Z).
    #[serde(default)]
    pub roll: Option<f64>,
}

/// Named facial landmark kinds reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkKind {
    LeftEye,
    RightEye,
    NoseBase,
    LeftCheek,
    RightCheek,
    MouthLeft,
    MouthRight,
    MouthBottom,
    LeftEar,
    RightEar,
}

impl LandmarkKind {
    /// Canonical encoding order. Feature vectors depend on this order, never on map iteration.
    pub const ALL: [LandmarkKind; 10] = [
        LandmarkKind::LeftEye,
        LandmarkKind::RightEye,
        LandmarkKind::NoseBase,
        LandmarkKind::LeftCheek,
        LandmarkKind::RightCheek,
        LandmarkKind::MouthLeft,
        LandmarkKind::MouthRight,
        LandmarkKind::MouthBottom,
        LandmarkKind::LeftEar,
        LandmarkKind::RightEar,
    ];
}

/// Named facial contour kinds reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContourKind {
    Face,
    LeftEyebrowTop,
    LeftEyebrowBottom,
    LeftEye,
    RightEye,
    UpperLipTop,
    LowerLipBottom,
    NoseBridge,
    NoseBottom,
}

impl ContourKind {
    /// Canonical encoding order, see [`LandmarkKind::ALL`].
    pub const ALL: [ContourKind; 9] = [
        ContourKind::Face,
        ContourKind::LeftEyebrowTop,
        ContourKind::LeftEyebrowBottom,
        ContourKind::LeftEye,
        ContourKind::RightEye,
        ContourKind::UpperLipTop,
        ContourKind::LowerLipBottom,
        ContourKind::NoseBridge,
        ContourKind::NoseBottom,
    ];
}

/// One face as reported by the external detector. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    #[serde(default)]
    pub bounds: Option<FaceBounds>,
    #[serde(default)]
    pub head_pose: HeadPose,
    #[serde(default)]
    pub smiling_probability: Option<f64>,
    #[serde(default)]
    pub left_eye_open_probability: Option<f64>,
    #[serde(default)]
    pub right_eye_open_probability: Option<f64>,
    #[serde(default)]
    pub landmarks: HashMap<LandmarkKind, Point>,
    #[serde(default)]
    pub contours: HashMap<ContourKind, Vec<Point>>,
}

impl DetectedFace {
    pub fn landmark(&self, kind: LandmarkKind) -> Option<Point> {
        self.landmarks.get(&kind).copied()
    }

    pub fn contour(&self, kind: ContourKind) -> Option<&[Point]> {
        self.contours.get(&kind).map(Vec::as_slice)
    }
}

/// Detector output for one image: zero or more faces, in detector order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceDetectionResult {
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
}

impl FaceDetectionResult {
    pub fn new(faces: Vec<DetectedFace>) -> Self {
        Self { faces }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    /// The face used for comparison. Additional faces are ignored.
    pub fn first(&self) -> Option<&DetectedFace> {
        self.faces.first()
    }
}

/// Outcome of one comparison request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonVerdict {
    pub is_match: bool,
    /// Cosine similarity in [-1, 1].
    pub similarity_score: f64,
}

impl ComparisonVerdict {
    /// Apply the decision rule: a score at or above `threshold` is a match.
    pub fn decide(similarity_score: f64, threshold: f64) -> Self {
        Self {
            is_match: similarity_score >= threshold,
            similarity_score,
        }
    }

    /// Score as a percentage, e.g. `87.5` for a similarity of 0.875.
    pub fn score_percent(&self) -> f64 {
        self.similarity_score * 100.0
    }
}
