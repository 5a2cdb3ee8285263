//! facecheck-core — Face comparison engine.
//!
//! Turns external face-detector output into fixed-length feature vectors,
//! scores pairs by cosine similarity and applies a match threshold. Every
//! failure inside a comparison resolves to a no-match verdict.

pub mod comparator;
pub mod detector;
pub mod features;
pub mod resolver;
pub mod similarity;
pub mod types;

pub use comparator::{
    ComparatorConfig, CompareError, ComparisonReport, ConfigError, FaceComparator,
};
pub use detector::{DetectorError, DetectorOptions, FaceDetector, RecordedDetector};
pub use features::{FeatureVector, FeatureVectorBuilder, FEATURE_DIM};
pub use resolver::ImageResolver;
pub use types::{ComparisonVerdict, DetectedFace, FaceDetectionResult};
