//! facematch-core: face detection and identity recognition.
//!
//! Faces are located with an OpenCV Haar cascade and identified with an
//! LBPH recognizer trained from a CSV manifest of labelled images.

pub mod annotate;
pub mod dataset;
pub mod detector;
pub mod pipeline;
pub mod recognizer;
pub mod store;
pub mod training;
pub mod types;

pub use annotate::Annotator;
pub use dataset::{DatasetIndex, DatasetProvider, DatasetStats, FileDataset, MemoryDataset};
pub use detector::{FaceDetector, HaarCascadeDetector};
pub use pipeline::{Recognition, RecognitionPipeline};
pub use recognizer::{AppearanceModel, LbphParams};
pub use store::{ModelStore, TrainedModel};
pub use training::{train_from_dataset, TrainReport};
pub use types::{DetectedRegion, ErrorKind, LabelTable, RecognitionResult};

use std::path::PathBuf;

const CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";

const CASCADE_DIRS: [&str; 4] = [
    "/usr/share/opencv4/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv/haarcascades",
];

/// Frontal-face cascade from the first system OpenCV install that has one.
///
/// Falls back to the first candidate so the resulting error names a
/// sensible location.
pub fn default_cascade_path() -> PathBuf {
    CASCADE_DIRS
        .iter()
        .map(|dir| PathBuf::from(dir).join(CASCADE_FILE))
        .find(|p| p.is_file())
        .unwrap_or_else(|| PathBuf::from(CASCADE_DIRS[0]).join(CASCADE_FILE))
}
