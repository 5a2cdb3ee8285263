//! Two-image face comparison pipeline.
//!
//! resolve both references → presence check (both images, concurrently) →
//! full detection (both images, concurrently) → feature vectors → cosine
//! similarity → threshold.
//!
//! Fail-closed: [`FaceComparator::compare_faces`] never returns an error. Every
//! internal failure becomes `{ is_match: false, similarity_score: 0 }`.

use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::features::{FeatureVector, FeatureVectorBuilder};
use crate::resolver::ImageResolver;
use crate::similarity::SimilarityError;
use crate::types::{ComparisonVerdict, FaceDetectionResult};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.5;
const DEFAULT_MIN_FACE_SIZE: f64 = 0.15;

/// Which side of the comparison an image is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Captured,
    Reference,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRole::Captured => f.write_str("captured"),
            ImageRole::Reference => f.write_str("reference"),
        }
    }
}

/// Pipeline phase in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Presence,
    Extraction,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Presence => f.write_str("presence check"),
            Stage::Extraction => f.write_str("feature extraction"),
        }
    }
}

/// Internal failure reasons. Callers of `compare_faces` only ever see the
/// fail-closed verdict; `try_compare` exposes these for diagnostics.
#[derive(Error, Debug)]
pub enum CompareError {
    #[error("no face detected in captured image ({stage})")]
    NoFaceCaptured { stage: Stage },
    #[error("no face detected in reference image ({stage})")]
    NoFaceReference { stage: Stage },
    #[error("detector failed on {image} image: {source}")]
    Detector {
        image: ImageRole,
        #[source]
        source: DetectorError,
    },
    #[error("feature vector dimension mismatch: captured {captured}, reference {reference}")]
    DimensionMismatch { captured: usize, reference: usize },
}

impl CompareError {
    fn no_face(image: ImageRole, stage: Stage) -> Self {
        match image {
            ImageRole::Captured => CompareError::NoFaceCaptured { stage },
            ImageRole::Reference => CompareError::NoFaceReference { stage },
        }
    }
}

impl ComparisonVerdict {
    /// The only verdict an internal failure may produce.
    pub fn fail_closed(reason: &CompareError) -> Self {
        match reason {
            CompareError::NoFaceCaptured { .. }
            | CompareError::NoFaceReference { .. }
            | CompareError::Detector { .. }
            | CompareError::DimensionMismatch { .. } => ComparisonVerdict {
                is_match: false,
                similarity_score: 0.0,
            },
        }
    }
}

impl From<CompareError> for ComparisonVerdict {
    fn from(reason: CompareError) -> Self {
        ComparisonVerdict::fail_closed(&reason)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("similarity threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("minimum face size must be in (0, 1], got {0}")]
    InvalidMinFaceSize(f64),
}

/// Tunables for a [`FaceComparator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparatorConfig {
    /// Minimum cosine similarity for a match (inclusive).
    pub similarity_threshold: f64,
    /// Minimum face size relative to the image, passed to the detector.
    pub min_face_size: f64,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
        }
    }
}

impl ComparatorConfig {
    pub fn new(similarity_threshold: f64, min_face_size: f64) -> Result<Self, ConfigError> {
        let config = Self {
            similarity_threshold,
            min_face_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Both the threshold and the minimum face size must lie in (0, 1].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !in_unit_interval(self.similarity_threshold) {
            return Err(ConfigError::InvalidThreshold(self.similarity_threshold));
        }
        if !in_unit_interval(self.min_face_size) {
            return Err(ConfigError::InvalidMinFaceSize(self.min_face_size));
        }
        Ok(())
    }
}

/// `value` in (0, 1]; false for NaN.
fn in_unit_interval(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

/// Successful comparison with diagnostic extras.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonReport {
    pub verdict: ComparisonVerdict,
    /// L2 distance between the two feature vectors. Informational only.
    pub euclidean_distance: f64,
}

/// Compares a captured face image against a reference image.
///
/// Holds no per-request state: one comparator can serve concurrent requests.
#[derive(Clone)]
pub struct FaceComparator {
    detector: Arc<dyn FaceDetector>,
    resolver: ImageResolver,
    builder: FeatureVectorBuilder,
    config: ComparatorConfig,
}

impl FaceComparator {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        resolver: ImageResolver,
        config: ComparatorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            detector,
            resolver,
            builder: FeatureVectorBuilder,
            config,
        })
    }

    pub fn config(&self) -> &ComparatorConfig {
        &self.config
    }

    /// Compare two images. Never fails; internal errors yield the fail-closed verdict.
    pub async fn compare_faces(&self, captured: &str, reference: &str) -> ComparisonVerdict {
        match self.try_compare(captured, reference).await {
            Ok(report) => report.verdict,
            Err(reason) => {
                tracing::warn!(
                    captured,
                    reference,
                    reason = %reason,
                    "face comparison failed; returning no-match"
                );
                ComparisonVerdict::fail_closed(&reason)
            }
        }
    }

    /// Run the pipeline and surface the internal failure reason.
    ///
    /// Diagnostic entry point; authentication decisions go through
    /// [`compare_faces`](Self::compare_faces).
    pub async fn try_compare(
        &self,
        captured: &str,
        reference: &str,
    ) -> Result<ComparisonReport, CompareError> {
        let (captured, reference) =
            tokio::join!(self.resolver.resolve(captured), self.resolver.resolve(reference));

        tracing::debug!(%captured, %reference, "detecting faces");
        let presence = DetectorOptions::presence(self.config.min_face_size);
        self.detect_pair(&captured, &reference, presence, Stage::Presence)
            .await?;

        tracing::debug!("extracting face features");
        let full = DetectorOptions::full(self.config.min_face_size);
        let (captured_faces, reference_faces) = self
            .detect_pair(&captured, &reference, full, Stage::Extraction)
            .await?;

        let captured_vec = self.builder.build(captured_faces.first());
        let reference_vec = self.builder.build(reference_faces.first());

        tracing::debug!("calculating similarity");
        let report = self.score(&captured_vec, &reference_vec)?;

        tracing::info!(
            matched = report.verdict.is_match,
            similarity = report.verdict.similarity_score,
            threshold = self.config.similarity_threshold,
            "face comparison complete"
        );
        Ok(report)
    }

    /// Similarity and decision for two already-built vectors.
    pub fn score(
        &self,
        captured: &FeatureVector,
        reference: &FeatureVector,
    ) -> Result<ComparisonReport, CompareError> {
        let mismatch = |e: SimilarityError| match e {
            SimilarityError::DimensionMismatch { left, right } => CompareError::DimensionMismatch {
                captured: left,
                reference: right,
            },
        };
        let similarity = captured.similarity(reference).map_err(mismatch)?;
        let euclidean_distance = captured.euclidean_distance(reference).map_err(mismatch)?;

        Ok(ComparisonReport {
            verdict: ComparisonVerdict::decide(similarity, self.config.similarity_threshold),
            euclidean_distance,
        })
    }

    /// Detect on both images concurrently; both must contain at least one face.
    async fn detect_pair(
        &self,
        captured: &str,
        reference: &str,
        options: DetectorOptions,
        stage: Stage,
    ) -> Result<(FaceDetectionResult, FaceDetectionResult), CompareError> {
        let (captured_res, reference_res) = tokio::join!(
            self.spawn_detect(captured, options),
            self.spawn_detect(reference, options),
        );

        let captured_faces = require_face(captured_res, ImageRole::Captured, stage)?;
        let reference_faces = require_face(reference_res, ImageRole::Reference, stage)?;

        tracing::debug!(
            %stage,
            captured_faces = captured_faces.len(),
            reference_faces = reference_faces.len(),
            "detection complete"
        );
        Ok((captured_faces, reference_faces))
    }

    /// Run one detector call on its own task so a panicking detector is
    /// contained and reported as an error.
    async fn spawn_detect(
        &self,
        image: &str,
        options: DetectorOptions,
    ) -> Result<FaceDetectionResult, DetectorError> {
        let detector = Arc::clone(&self.detector);
        let image = image.to_string();
        tokio::spawn(async move { detector.detect(&image, &options).await })
            .await
            .map_err(|e| DetectorError::TaskFailed(e.to_string()))?
    }
}

fn require_face(
    result: Result<FaceDetectionResult, DetectorError>,
    image: ImageRole,
    stage: Stage,
) -> Result<FaceDetectionResult, CompareError> {
    let faces = result.map_err(|source| CompareError::Detector { image, source })?;
    if faces.is_empty() {
        return Err(CompareError::no_face(image, stage));
    }
    Ok(faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Coverage;
    use crate::types::{DetectedFace, FaceBounds, HeadPose, LandmarkKind, Point};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory detector keyed by resolved reference. Records every call.
    #[derive(Default)]
    struct ScriptedDetector {
        presence: HashMap<String, Result<FaceDetectionResult, String>>,
        full: HashMap<String, Result<FaceDetectionResult, String>>,
        calls: Mutex<Vec<(String, Stage)>>,
    }

    impl ScriptedDetector {
        fn with_image(mut self, image: &str, faces: Vec<DetectedFace>) -> Self {
            let result = FaceDetectionResult::new(faces);
            self.presence.insert(format!("file://{image}"), Ok(result.clone()));
            self.full.insert(format!("file://{image}"), Ok(result));
            self
        }

        fn with_full(mut self, image: &str, faces: Vec<DetectedFace>) -> Self {
            self.full
                .insert(format!("file://{image}"), Ok(FaceDetectionResult::new(faces)));
            self
        }

        fn failing(mut self, image: &str, message: &str) -> Self {
            self.presence
                .insert(format!("file://{image}"), Err(message.to_string()));
            self
        }

        fn calls(&self) -> Vec<(String, Stage)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FaceDetector for ScriptedDetector {
        async fn detect(
            &self,
            image: &str,
            options: &DetectorOptions,
        ) -> Result<FaceDetectionResult, DetectorError> {
            let stage = if options.landmarks == Coverage::All {
                Stage::Extraction
            } else {
                Stage::Presence
            };
            self.calls.lock().unwrap().push((image.to_string(), stage));

            let table = match stage {
                Stage::Presence => &self.presence,
                Stage::Extraction => &self.full,
            };
            match table.get(image) {
                Some(Ok(result)) => Ok(result.clone()),
                Some(Err(message)) => Err(DetectorError::Failed(message.clone())),
                None => Err(DetectorError::ImageUnreadable(image.to_string())),
            }
        }
    }

    struct PanickingDetector;

    #[async_trait]
    impl FaceDetector for PanickingDetector {
        async fn detect(
            &self,
            _image: &str,
            _options: &DetectorOptions,
        ) -> Result<FaceDetectionResult, DetectorError> {
            panic!("detector crashed");
        }
    }

    fn comparator(detector: impl FaceDetector + 'static) -> FaceComparator {
        FaceComparator::new(
            Arc::new(detector),
            ImageResolver::new(std::env::temp_dir().join("facecheck-test-cache")),
            ComparatorConfig::default(),
        )
        .unwrap()
    }

    fn portrait() -> DetectedFace {
        let mut face = DetectedFace {
            bounds: Some(FaceBounds { x: 100.0, y: 100.0, width: 200.0, height: 250.0 }),
            head_pose: HeadPose { pitch: Some(2.0), yaw: Some(-5.0), roll: Some(1.0) },
            smiling_probability: Some(0.3),
            left_eye_open_probability: Some(0.95),
            right_eye_open_probability: Some(0.94),
            ..Default::default()
        };
        face.landmarks.insert(LandmarkKind::LeftEye, Point::new(160.0, 180.0));
        face.landmarks.insert(LandmarkKind::RightEye, Point::new(240.0, 180.0));
        face.landmarks.insert(LandmarkKind::NoseBase, Point::new(200.0, 230.0));
        face
    }

    fn fail_closed() -> ComparisonVerdict {
        ComparisonVerdict { is_match: false, similarity_score: 0.0 }
    }

    #[tokio::test]
    async fn test_identical_faces_match() {
        let detector = ScriptedDetector::default()
            .with_image("/captured.jpg", vec![portrait()])
            .with_image("/reference.jpg", vec![portrait()]);

        let verdict = comparator(detector)
            .compare_faces("/captured.jpg", "/reference.jpg")
            .await;

        assert!(verdict.is_match);
        assert!((verdict.similarity_score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_reference_without_face_fails_closed() {
        let detector = ScriptedDetector::default()
            .with_image("/captured.jpg", vec![portrait()])
            .with_image("/reference.jpg", vec![]);
        let cmp = comparator(detector);

        assert_eq!(cmp.compare_faces("/captured.jpg", "/reference.jpg").await, fail_closed());
        assert!(matches!(
            cmp.try_compare("/captured.jpg", "/reference.jpg").await,
            Err(CompareError::NoFaceReference { stage: Stage::Presence })
        ));
    }

    #[tokio::test]
    async fn test_captured_without_face_fails_closed() {
        let detector = ScriptedDetector::default()
            .with_image("/captured.jpg", vec![])
            .with_image("/reference.jpg", vec![portrait()]);
        let cmp = comparator(detector);

        assert_eq!(cmp.compare_faces("/captured.jpg", "/reference.jpg").await, fail_closed());
        assert!(matches!(
            cmp.try_compare("/captured.jpg", "/reference.jpg").await,
            Err(CompareError::NoFaceCaptured { stage: Stage::Presence })
        ));
    }

    #[tokio::test]
    async fn test_orthogonal_vectors_do_not_match() {
        let horizontal = DetectedFace {
            bounds: Some(FaceBounds { x: 300.0, ..Default::default() }),
            ..Default::default()
        };
        let vertical = DetectedFace {
            bounds: Some(FaceBounds { y: 300.0, ..Default::default() }),
            ..Default::default()
        };
        let detector = ScriptedDetector::default()
            .with_image("/captured.jpg", vec![horizontal])
            .with_image("/reference.jpg", vec![vertical]);

        let verdict = comparator(detector)
            .compare_faces("/captured.jpg", "/reference.jpg")
            .await;

        assert!(!verdict.is_match);
        assert_eq!(verdict.similarity_score, 0.0);
    }

    #[tokio::test]
    async fn test_presence_completes_before_extraction() {
        let detector = Arc::new(
            ScriptedDetector::default()
                .with_image("/captured.jpg", vec![portrait()])
                .with_image("/reference.jpg", vec![portrait()]),
        );
        let cmp = FaceComparator::new(
            detector.clone(),
            ImageResolver::new(std::env::temp_dir()),
            ComparatorConfig::default(),
        )
        .unwrap();
        cmp.compare_faces("/captured.jpg", "/reference.jpg").await;

        let calls = detector.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[..2].iter().all(|(_, stage)| *stage == Stage::Presence));
        assert!(calls[2..].iter().all(|(_, stage)| *stage == Stage::Extraction));
        let mut presence: Vec<_> = calls[..2].iter().map(|(img, _)| img.as_str()).collect();
        presence.sort_unstable();
        assert_eq!(presence, ["file:///captured.jpg", "file:///reference.jpg"]);
    }

    #[tokio::test]
    async fn test_presence_failure_skips_extraction() {
        let detector = Arc::new(
            ScriptedDetector::default()
                .with_image("/captured.jpg", vec![])
                .with_image("/reference.jpg", vec![portrait()]),
        );
        let cmp = FaceComparator::new(
            detector.clone(),
            ImageResolver::new(std::env::temp_dir()),
            ComparatorConfig::default(),
        )
        .unwrap();
        cmp.compare_faces("/captured.jpg", "/reference.jpg").await;

        assert!(detector.calls().iter().all(|(_, stage)| *stage == Stage::Presence));
    }

    #[tokio::test]
    async fn test_extraction_without_face_fails_closed() {
        let detector = ScriptedDetector::default()
            .with_image("/captured.jpg", vec![portrait()])
            .with_image("/reference.jpg", vec![portrait()])
            .with_full("/reference.jpg", vec![]);
        let cmp = comparator(detector);

        assert!(matches!(
            cmp.try_compare("/captured.jpg", "/reference.jpg").await,
            Err(CompareError::NoFaceReference { stage: Stage::Extraction })
        ));
        assert_eq!(cmp.compare_faces("/captured.jpg", "/reference.jpg").await, fail_closed());
    }

    #[tokio::test]
    async fn test_detector_error_fails_closed() {
        let detector = ScriptedDetector::default()
            .failing("/captured.jpg", "unreadable image")
            .with_image("/reference.jpg", vec![portrait()]);
        let cmp = comparator(detector);

        assert!(matches!(
            cmp.try_compare("/captured.jpg", "/reference.jpg").await,
            Err(CompareError::Detector { image: ImageRole::Captured, .. })
        ));
        assert_eq!(cmp.compare_faces("/captured.jpg", "/reference.jpg").await, fail_closed());
    }

    #[tokio::test]
    async fn test_panicking_detector_fails_closed() {
        let cmp = comparator(PanickingDetector);
        assert_eq!(cmp.compare_faces("/a.jpg", "/b.jpg").await, fail_closed());
        assert!(matches!(
            cmp.try_compare("/a.jpg", "/b.jpg").await,
            Err(CompareError::Detector { source: DetectorError::TaskFailed(_), .. })
        ));
    }

    #[tokio::test]
    async fn test_only_first_face_is_used() {
        let mut stranger = portrait();
        stranger.bounds = Some(FaceBounds { x: 900.0, y: 10.0, width: 20.0, height: 20.0 });
        let detector = ScriptedDetector::default()
            .with_image("/captured.jpg", vec![portrait(), stranger])
            .with_image("/reference.jpg", vec![portrait()]);

        let verdict = comparator(detector)
            .compare_faces("/captured.jpg", "/reference.jpg")
            .await;
        assert!((verdict.similarity_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_threshold_boundary() {
        let cmp = comparator(ScriptedDetector::default());
        // cos = 0.5 exactly: (1, 0) against (1, sqrt(3)) has cos 60deg.
        let a = FeatureVector::from_values(vec![1.0, 0.0]);
        let b = FeatureVector::from_values(vec![1.0, 3.0f64.sqrt()]);
        let report = cmp.score(&a, &b).unwrap();
        assert!((report.verdict.similarity_score - 0.5).abs() < 1e-12);

        assert!(ComparisonVerdict::decide(0.5, cmp.config().similarity_threshold).is_match);
        assert!(!ComparisonVerdict::decide(0.4999, cmp.config().similarity_threshold).is_match);
    }

    #[test]
    fn test_score_dimension_mismatch() {
        let cmp = comparator(ScriptedDetector::default());
        let a = FeatureVector::from_values(vec![1.0; 128]);
        let b = FeatureVector::from_values(vec![1.0; 64]);
        let err = cmp.score(&a, &b).unwrap_err();
        assert!(matches!(
            err,
            CompareError::DimensionMismatch { captured: 128, reference: 64 }
        ));
        assert_eq!(ComparisonVerdict::from(err), fail_closed());
    }

    #[test]
    fn test_score_reports_distance() {
        let cmp = comparator(ScriptedDetector::default());
        let a = FeatureVector::from_values(vec![0.0, 0.0]);
        let b = FeatureVector::from_values(vec![3.0, 4.0]);
        let report = cmp.score(&a, &b).unwrap();
        assert_eq!(report.verdict, fail_closed());
        assert!((report.euclidean_distance - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_custom_threshold() {
        let cmp = FaceComparator::new(
            Arc::new(ScriptedDetector::default()),
            ImageResolver::new(std::env::temp_dir()),
            ComparatorConfig { similarity_threshold: 0.9, ..Default::default() },
        )
        .unwrap();
        let a = FeatureVector::from_values(vec![1.0, 0.0]);
        let b = FeatureVector::from_values(vec![1.0, 1.0]);
        let report = cmp.score(&a, &b).unwrap();
        assert!(!report.verdict.is_match);
    }

    #[test]
    fn test_config_rejects_non_positive_threshold() {
        for threshold in [0.0, -0.5, 1.5, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                ComparatorConfig::new(threshold, 0.15),
                Err(ConfigError::InvalidThreshold(_))
            ));
        }
        assert!(ComparatorConfig::new(1.0, 0.15).is_ok());
        assert!(matches!(
            ComparatorConfig::new(0.5, 0.0),
            Err(ConfigError::InvalidMinFaceSize(_))
        ));
    }

    #[test]
    fn test_comparator_refuses_zero_threshold() {
        let result = FaceComparator::new(
            Arc::new(ScriptedDetector::default()),
            ImageResolver::new(std::env::temp_dir()),
            ComparatorConfig { similarity_threshold: 0.0, ..Default::default() },
        );
        assert!(matches!(result, Err(ConfigError::InvalidThreshold(t)) if t == 0.0));
    }

    #[test]
    fn test_zero_vectors_never_match_at_lowest_threshold() {
        let cmp = FaceComparator::new(
            Arc::new(ScriptedDetector::default()),
            ImageResolver::new(std::env::temp_dir()),
            ComparatorConfig { similarity_threshold: f64::MIN_POSITIVE, ..Default::default() },
        )
        .unwrap();
        let zeros = FeatureVector::from_values(vec![0.0; 128]);
        assert_eq!(cmp.score(&zeros, &zeros).unwrap().verdict, fail_closed());
    }

    #[test]
    fn test_fail_closed_for_every_reason() {
        let reasons = [
            CompareError::NoFaceCaptured { stage: Stage::Presence },
            CompareError::NoFaceReference { stage: Stage::Extraction },
            CompareError::Detector {
                image: ImageRole::Reference,
                source: DetectorError::Failed("boom".into()),
            },
            CompareError::DimensionMismatch { captured: 128, reference: 0 },
        ];
        for reason in &reasons {
            assert_eq!(ComparisonVerdict::fail_closed(reason), fail_closed());
        }
    }
}
