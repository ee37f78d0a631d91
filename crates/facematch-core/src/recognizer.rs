//! LBPH (local binary pattern histogram) face recognizer.
//!
//! A thin wrapper over OpenCV's `LBPHFaceRecognizer`. Prediction returns
//! the label of the nearest training face together with OpenCV's
//! chi-square distance as a dissimilarity score. The recognizer runs with
//! an unbounded threshold, so accept/reject is decided by the caller.

use crate::detector::gray_to_mat;
use chrono::{DateTime, Utc};
use image::GrayImage;
use opencv::core::{Mat, MatTraitConst, Ptr, Vector};
use opencv::face::{
    FaceRecognizerTrait, FaceRecognizerTraitConst, LBPHFaceRecognizer, LBPHFaceRecognizerTraitConst,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const LBPH_RADIUS: u32 = 1;
const LBPH_NEIGHBORS: u32 = 8;
const LBPH_GRID_X: u32 = 8;
const LBPH_GRID_Y: u32 = 8;
const LBPH_MAX_NEIGHBORS: u32 = 16;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("invalid input shape: {0}")]
    InvalidInputShape(String),
    #[error("invalid LBPH parameters: {0}")]
    InvalidParams(String),
    #[error("model state is corrupt: {0}")]
    Corrupt(String),
    #[error("label {0} does not fit an OpenCV label")]
    LabelOutOfRange(u32),
    #[error("model path is not UTF-8: {0}")]
    NonUtf8Path(String),
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// LBPH operator and grid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: LBPH_RADIUS,
            neighbors: LBPH_NEIGHBORS,
            grid_x: LBPH_GRID_X,
            grid_y: LBPH_GRID_Y,
        }
    }
}

impl LbphParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.radius == 0 {
            return Err(ModelError::InvalidParams("radius must be at least 1".into()));
        }
        if self.neighbors == 0 || self.neighbors > LBPH_MAX_NEIGHBORS {
            return Err(ModelError::InvalidParams(format!(
                "neighbors must be in 1..={LBPH_MAX_NEIGHBORS}, got {}",
                self.neighbors
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(ModelError::InvalidParams("grid must be at least 1x1".into()));
        }
        Ok(())
    }

    /// Smallest face (width, height) that leaves one LBP pixel per grid cell.
    pub fn min_input(&self) -> (u32, u32) {
        let border = 2 * self.radius;
        (border + self.grid_x, border + self.grid_y)
    }

    /// Check a face of `width` × `height` is at least [`min_input`](Self::min_input).
    pub fn check_input(&self, width: u32, height: u32) -> Result<(), ModelError> {
        if width == 0 || height == 0 {
            return Err(ModelError::InvalidInputShape(format!(
                "zero-area region {width}x{height}"
            )));
        }
        let (min_w, min_h) = self.min_input();
        if width < min_w || height < min_h {
            return Err(ModelError::InvalidInputShape(format!(
                "region {width}x{height} is smaller than the {min_w}x{min_h} minimum"
            )));
        }
        Ok(())
    }

    fn create_recognizer(&self) -> Result<Ptr<LBPHFaceRecognizer>, ModelError> {
        Ok(LBPHFaceRecognizer::create(
            self.radius as i32,
            self.neighbors as i32,
            self.grid_x as i32,
            self.grid_y as i32,
            f64::MAX,
        )?)
    }
}

/// Best match for a face crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: u32,
    /// Distance to the nearest training face. 0 is identical; unbounded above.
    pub dissimilarity: f64,
}

/// Trained LBPH model. OpenCV keeps histograms only, never the training images.
pub struct AppearanceModel {
    params: LbphParams,
    trained_at: DateTime<Utc>,
    recognizer: Mutex<Ptr<LBPHFaceRecognizer>>,
    labels: Vec<u32>,
    sample_count: usize,
}

impl fmt::Debug for AppearanceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppearanceModel")
            .field("params", &self.params)
            .field("trained_at", &self.trained_at)
            .field("labels", &self.labels)
            .field("sample_count", &self.sample_count)
            .finish_non_exhaustive()
    }
}

impl AppearanceModel {
    /// Train with default LBPH parameters.
    pub fn train(faces: &[(GrayImage, u32)]) -> Result<Self, ModelError> {
        Self::train_with(LbphParams::default(), faces)
    }

    /// Train from scratch. Every face must be large enough for `params`.
    pub fn train_with(params: LbphParams, faces: &[(GrayImage, u32)]) -> Result<Self, ModelError> {
        params.validate()?;
        if faces.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }

        let mut images = Vector::<Mat>::new();
        let mut cv_labels = Vector::<i32>::new();
        for (face, label) in faces {
            params.check_input(face.width(), face.height())?;
            images.push(gray_to_mat(face)?);
            cv_labels.push(i32::try_from(*label).map_err(|_| ModelError::LabelOutOfRange(*label))?);
        }

        let mut recognizer = params.create_recognizer()?;
        recognizer.train(&images, &cv_labels)?;

        tracing::debug!(samples = faces.len(), ?params, "LBPH model trained");

        Ok(Self {
            params,
            trained_at: Utc::now(),
            recognizer: Mutex::new(recognizer),
            labels: distinct(faces.iter().map(|(_, label)| *label)),
            sample_count: faces.len(),
        })
    }

    /// Predict the label of a single-channel face crop.
    pub fn predict(&self, face: &GrayImage) -> Result<Prediction, ModelError> {
        self.params.check_input(face.width(), face.height())?;
        let mat = gray_to_mat(face)?;

        let mut label = -1;
        let mut distance = f64::MAX;
        self.recognizer.lock().predict(&mat, &mut label, &mut distance)?;

        let label = u32::try_from(label)
            .map_err(|_| ModelError::Corrupt(format!("recognizer returned label {label}")))?;
        Ok(Prediction {
            label,
            dissimilarity: distance,
        })
    }

    /// Predict from a raw buffer that must hold exactly `width * height`
    /// single-channel bytes. Multi-channel buffers are rejected.
    pub fn predict_pixels(&self, pixels: &[u8], width: u32, height: u32) -> Result<Prediction, ModelError> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(ModelError::InvalidInputShape(format!(
                "expected {expected} single-channel bytes for {width}x{height}, got {}",
                pixels.len()
            )));
        }
        let face = GrayImage::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
            ModelError::InvalidInputShape(format!("buffer does not fit {width}x{height}"))
        })?;
        self.predict(&face)
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    /// Training time, or the artifact's modification time for a loaded model.
    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Distinct labels present in the model, ascending.
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Write the full recognizer state with OpenCV's `FaceRecognizer::write`.
    /// The storage format (YAML, XML or JSON) follows the file extension.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let name = utf8_path(path)?;
        FaceRecognizerTraitConst::write(&*self.recognizer.lock(), name)?;
        Ok(())
    }

    /// Read a model written by [`save`](Self::save), validating its shape.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let name = utf8_path(path)?;
        let modified = std::fs::metadata(path)?.modified()?;

        let mut recognizer = LbphParams::default().create_recognizer()?;
        FaceRecognizerTrait::read(&mut recognizer, name)?;

        let params = LbphParams {
            radius: non_negative(recognizer.get_radius()?, "radius")?,
            neighbors: non_negative(recognizer.get_neighbors()?, "neighbors")?,
            grid_x: non_negative(recognizer.get_grid_x()?, "grid_x")?,
            grid_y: non_negative(recognizer.get_grid_y()?, "grid_y")?,
        };
        params
            .validate()
            .map_err(|e| ModelError::Corrupt(e.to_string()))?;

        let raw = recognizer.get_labels()?;
        let raw = raw
            .data_typed::<i32>()
            .map_err(|e| ModelError::Corrupt(format!("label matrix: {e}")))?;
        if raw.is_empty() {
            return Err(ModelError::Corrupt("model has no samples".into()));
        }
        let sample_labels = raw
            .iter()
            .map(|&l| u32::try_from(l).map_err(|_| ModelError::Corrupt(format!("negative label {l}"))))
            .collect::<Result<Vec<_>, _>>()?;

        let histograms = recognizer.get_histograms()?.len();
        if histograms != sample_labels.len() {
            return Err(ModelError::Corrupt(format!(
                "{histograms} histograms for {} labels",
                sample_labels.len()
            )));
        }

        Ok(Self {
            params,
            trained_at: DateTime::<Utc>::from(modified),
            recognizer: Mutex::new(recognizer),
            labels: distinct(sample_labels.iter().copied()),
            sample_count: sample_labels.len(),
        })
    }
}

fn distinct(labels: impl Iterator<Item = u32>) -> Vec<u32> {
    let mut labels: Vec<u32> = labels.collect();
    labels.sort_unstable();
    labels.dedup();
    labels
}

fn non_negative(value: i32, field: &str) -> Result<u32, ModelError> {
    u32::try_from(value).map_err(|_| ModelError::Corrupt(format!("{field} is {value}")))
}

fn utf8_path(path: &Path) -> Result<&str, ModelError> {
    path.to_str()
        .ok_or_else(|| ModelError::NonUtf8Path(path.display().to_string()))
}
