//! Face detection with an OpenCV Haar cascade.
//!
//! [`HaarCascadeDetector`] runs `CascadeClassifier::detect_multi_scale` with
//! a fixed scale factor and neighbor count. Images stay in `image` crate
//! buffers everywhere else and are copied into a `Mat` only at this seam.

use crate::types::{DetectedRegion, ErrorKind};
use image::{DynamicImage, GrayImage};
use opencv::core::{Mat, MatTrait, Rect, Scalar, Size, Vector, CV_8UC1};
use opencv::objdetect::{CascadeClassifier, CascadeClassifierTrait, CascadeClassifierTraitConst};
use parking_lot::Mutex;
use std::path::Path;
use thiserror::Error;

// --- Named constants (fixed detector configuration) ---
const HAAR_SCALE_FACTOR: f64 = 1.3;
const HAAR_MIN_NEIGHBORS: i32 = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade file not found: {0} (set FACEMATCH_CASCADE_PATH to an OpenCV Haar cascade)")]
    CascadeNotFound(String),
    #[error("cascade load failed: {0}")]
    CascadeLoad(String),
    #[error("invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

impl DetectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectorError::InvalidImage(_) | DetectorError::OpenCv(_) => ErrorKind::InvalidImage,
            DetectorError::CascadeNotFound(_) | DetectorError::CascadeLoad(_) => {
                ErrorKind::ModelLoadError
            }
        }
    }
}

/// Locates candidate face regions in a grayscale image.
///
/// An image without faces yields an empty vector, not an error.
pub trait FaceDetector: Send + Sync {
    /// Detector identifier.
    fn name(&self) -> &'static str;

    fn detect(&self, image: &GrayImage) -> Result<Vec<DetectedRegion>, DetectorError>;
}

/// Decode raster bytes in any supported encoding.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, DetectorError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Decode raster bytes straight to single-channel form.
pub fn decode_grayscale(bytes: &[u8]) -> Result<GrayImage, DetectorError> {
    Ok(decode_image(bytes)?.to_luma8())
}

/// Copy a grayscale buffer into a single-channel 8-bit `Mat`.
pub(crate) fn gray_to_mat(image: &GrayImage) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        CV_8UC1,
        Scalar::all(0.0),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(image.as_raw());
    Ok(mat)
}

/// Haar cascade detector with fixed scale factor and neighbor count.
///
/// `detect_multi_scale` needs `&mut self`, so the classifier sits behind a
/// mutex and concurrent detections on one detector run one at a time.
pub struct HaarCascadeDetector {
    classifier: Mutex<CascadeClassifier>,
    scale_factor: f64,
    min_neighbors: i32,
}

impl HaarCascadeDetector {
    /// Load an OpenCV Haar cascade XML file.
    pub fn load(path: &Path) -> Result<Self, DetectorError> {
        if !path.is_file() {
            return Err(DetectorError::CascadeNotFound(path.display().to_string()));
        }
        let name = path
            .to_str()
            .ok_or_else(|| DetectorError::CascadeLoad(format!("{}: path is not UTF-8", path.display())))?;

        let classifier = CascadeClassifier::new(name)
            .map_err(|e| DetectorError::CascadeLoad(format!("{}: {e}", path.display())))?;
        // OpenCV reports an unparseable file as an empty classifier, not an error.
        if classifier.empty()? {
            return Err(DetectorError::CascadeLoad(format!(
                "{}: not an OpenCV cascade classifier",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "loaded Haar cascade");

        Ok(Self {
            classifier: Mutex::new(classifier),
            scale_factor: HAAR_SCALE_FACTOR,
            min_neighbors: HAAR_MIN_NEIGHBORS,
        })
    }
}

impl FaceDetector for HaarCascadeDetector {
    fn name(&self) -> &'static str {
        "haar-cascade"
    }

    fn detect(&self, image: &GrayImage) -> Result<Vec<DetectedRegion>, DetectorError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Ok(Vec::new());
        }

        let mat = gray_to_mat(image)?;
        let mut rects = Vector::<Rect>::new();
        self.classifier.lock().detect_multi_scale(
            &mat,
            &mut rects,
            self.scale_factor,
            self.min_neighbors,
            0,
            Size::new(0, 0),
            Size::new(0, 0),
        )?;

        let faces: Vec<DetectedRegion> = rects
            .iter()
            .map(|r| region_of(r).clamped(w, h))
            .filter(|r| r.area() > 0)
            .collect();

        tracing::debug!(faces = faces.len(), "haar scan complete");
        Ok(faces)
    }
}

fn region_of(rect: Rect) -> DetectedRegion {
    DetectedRegion::new(
        rect.x.max(0) as u32,
        rect.y.max(0) as u32,
        rect.width.max(0) as u32,
        rect.height.max(0) as u32,
    )
}
