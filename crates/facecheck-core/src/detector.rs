//! Face detector collaborator.
//!
//! The detector itself is external: anything that turns an image reference into
//! a [`FaceDetectionResult`] can back the comparator. [`RecordedDetector`] replays
//! detector output stored as JSON next to each image.

use crate::types::{DetectedFace, FaceDetectionResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix marking a local file reference.
pub const FILE_SCHEME: &str = "file://";
/// Suffix appended to an image path to locate its recorded detections.
const SIDECAR_SUFFIX: &str = ".faces.json";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("image not readable: {0}")]
    ImageUnreadable(String),
    #[error("unsupported image reference: {0}")]
    UnsupportedReference(String),
    #[error("invalid detector output for {path}: {source}")]
    InvalidOutput {
        path: String,
        source: serde_json::Error,
    },
    #[error("detection failed: {0}")]
    Failed(String),
    #[error("detector task failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceMode {
    Fast,
    Accurate,
}

/// Which optional categories the detector should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    None,
    All,
}

/// Detection configuration passed with every detector call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    pub performance: PerformanceMode,
    pub landmarks: Coverage,
    pub classifications: Coverage,
    pub contours: Coverage,
    /// Smallest face to report, relative to the image size.
    pub min_face_size: f64,
}

impl DetectorOptions {
    /// Lightweight "is there any face" mode.
    pub fn presence(min_face_size: f64) -> Self {
        Self {
            performance: PerformanceMode::Fast,
            landmarks: Coverage::None,
            classifications: Coverage::None,
            contours: Coverage::None,
            min_face_size,
        }
    }

    /// Everything the feature vector needs.
    pub fn full(min_face_size: f64) -> Self {
        Self {
            performance: PerformanceMode::Accurate,
            landmarks: Coverage::All,
            classifications: Coverage::All,
            contours: Coverage::All,
            min_face_size,
        }
    }

    /// Strip the categories these options do not request.
    pub fn apply(&self, mut face: DetectedFace) -> DetectedFace {
        if self.landmarks == Coverage::None {
            face.landmarks.clear();
        }
        if self.classifications == Coverage::None {
            face.smiling_probability = None;
            face.left_eye_open_probability = None;
            face.right_eye_open_probability = None;
        }
        if self.contours == Coverage::None {
            face.contours.clear();
        }
        face
    }
}

/// External face detector, one call per image.
///
/// `image` is a resolved reference: a `file://` path, or the original
/// reference when resolution failed.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect(
        &self,
        image: &str,
        options: &DetectorOptions,
    ) -> Result<FaceDetectionResult, DetectorError>;
}

/// Replays detector output recorded as JSON.
///
/// For `photo.jpg` the detections are read from `photo.jpg.faces.json`; a
/// reference that already names a `.json` file is read directly. The file
/// holds a serialized [`FaceDetectionResult`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedDetector;

impl RecordedDetector {
    /// Location of the recorded detections for a resolved image reference.
    pub fn sidecar_path(image: &str) -> Result<PathBuf, DetectorError> {
        let path = local_path(image)?;
        if path.extension().is_some_and(|ext| ext == "json") {
            return Ok(path.to_path_buf());
        }
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(SIDECAR_SUFFIX);
        Ok(PathBuf::from(sidecar))
    }
}

#[async_trait]
impl FaceDetector for RecordedDetector {
    async fn detect(
        &self,
        image: &str,
        options: &DetectorOptions,
    ) -> Result<FaceDetectionResult, DetectorError> {
        let path = Self::sidecar_path(image)?;
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DetectorError::ImageUnreadable(format!("{}: {e}", path.display())))?;

        let recorded: FaceDetectionResult =
            serde_json::from_str(&raw).map_err(|source| DetectorError::InvalidOutput {
                path: path.display().to_string(),
                source,
            })?;

        tracing::debug!(
            path = %path.display(),
            faces = recorded.len(),
            ?options,
            "replayed recorded detections"
        );

        Ok(FaceDetectionResult::new(
            recorded.faces.into_iter().map(|f| options.apply(f)).collect(),
        ))
    }
}

/// Strip the `file://` scheme. Remote references cannot be read locally.
fn local_path(image: &str) -> Result<&Path, DetectorError> {
    let path = image.strip_prefix(FILE_SCHEME).unwrap_or(image);
    if path.contains("://") {
        return Err(DetectorError::UnsupportedReference(image.to_string()));
    }
    Ok(Path::new(path))
}
