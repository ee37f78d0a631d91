//! Recognition pipeline: decode, detect, predict, annotate.
//!
//! The pipeline owns the published model snapshot. Training builds a whole
//! new [`TrainedModel`] elsewhere and hands it over with [`publish`], a
//! single write-lock swap. Each recognition clones the current `Arc` once
//! and runs to completion against it, so a concurrent retrain never mixes
//! an old model with a new label table.
//!
//! [`publish`]: RecognitionPipeline::publish

use crate::annotate::Annotator;
use crate::detector::{self, DetectorError, FaceDetector};
use crate::recognizer::{LbphParams, ModelError};
use crate::store::TrainedModel;
use crate::types::{
    confidence_percent, is_accepted, DetectedRegion, ErrorKind, LabelTable, RecognitionResult, ACCEPT_THRESHOLD,
};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("model not trained")]
    ModelNotTrained,
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("write failed: {0}")]
    Write(#[from] image::ImageError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ModelNotTrained => ErrorKind::ModelNotTrained,
            PipelineError::Detector(e) => e.kind(),
            PipelineError::Model(ModelError::InvalidInputShape(_)) => ErrorKind::InvalidInputShape,
            PipelineError::Model(_) => ErrorKind::ModelLoadError,
            PipelineError::Write(_) => ErrorKind::InvalidImage,
        }
    }
}

/// Result of one recognition call.
#[derive(Debug)]
pub struct Recognition {
    pub results: Vec<RecognitionResult>,
    pub total_faces: usize,
    /// RGB copy of the input with a box per result.
    pub annotated: RgbImage,
}

impl Recognition {
    /// Write the annotated image as `dir/name` and return its path.
    /// The format follows the file extension.
    pub fn write_annotated(&self, dir: &Path, name: &str) -> Result<PathBuf, PipelineError> {
        std::fs::create_dir_all(dir).map_err(image::ImageError::IoError)?;
        let path = dir.join(name);
        self.annotated.save(&path)?;
        Ok(path)
    }
}

pub struct RecognitionPipeline {
    detector: Box<dyn FaceDetector>,
    snapshot: RwLock<Option<Arc<TrainedModel>>>,
    accept_threshold: u8,
    annotator: Annotator,
}

impl RecognitionPipeline {
    pub fn new(detector: Box<dyn FaceDetector>) -> Self {
        Self {
            detector,
            snapshot: RwLock::new(None),
            accept_threshold: ACCEPT_THRESHOLD,
            annotator: Annotator::new(),
        }
    }

    pub fn with_accept_threshold(mut self, threshold: u8) -> Self {
        self.accept_threshold = threshold;
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn accept_threshold(&self) -> u8 {
        self.accept_threshold
    }

    /// Replace the active model. In-flight recognitions keep the old one.
    pub fn publish(&self, trained: TrainedModel) {
        let trained = Arc::new(trained);
        tracing::info!(
            samples = trained.model.sample_count(),
            people = trained.labels.len(),
            "model published"
        );
        *self.snapshot.write() = Some(trained);
    }

    pub fn snapshot(&self) -> Option<Arc<TrainedModel>> {
        self.snapshot.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.read().is_some()
    }

    /// Label table of the active model, empty when none is published.
    pub fn labels(&self) -> LabelTable {
        self.snapshot()
            .map(|t| t.labels.clone())
            .unwrap_or_default()
    }

    /// Recognize every face in an encoded image.
    ///
    /// Fails with [`PipelineError::ModelNotTrained`] before looking at
    /// `bytes` when no model is published.
    pub fn recognize(&self, bytes: &[u8]) -> Result<Recognition, PipelineError> {
        let trained = self.snapshot().ok_or(PipelineError::ModelNotTrained)?;

        let decoded = detector::decode_image(bytes)?;
        let gray = decoded.to_luma8();
        let mut annotated = decoded.to_rgb8();

        let regions = self.detector.detect(&gray)?;
        tracing::debug!(detector = self.detector.name(), faces = regions.len(), "faces detected");

        let mut results = Vec::with_capacity(regions.len());
        for region in &regions {
            let Some(crop) = face_crop(&gray, region, trained.model.params()) else {
                tracing::warn!(?region, "skipping face region with no pixels inside the image");
                continue;
            };
            let prediction = trained.model.predict(&crop)?;

            let confidence = confidence_percent(prediction.dissimilarity);
            let matched = is_accepted(confidence, self.accept_threshold);
            let name = trained.labels.resolve(prediction.label).to_string();

            tracing::debug!(
                name = %name,
                confidence,
                dissimilarity = prediction.dissimilarity,
                matched,
                "face scored"
            );

            results.push(RecognitionResult {
                region: *region,
                predicted_name: name,
                confidence_percent: confidence,
                matched,
                dissimilarity: prediction.dissimilarity,
            });
        }

        self.annotator.draw(&mut annotated, &results);

        Ok(Recognition {
            total_faces: regions.len(),
            results,
            annotated,
        })
    }
}

/// Grayscale crop of `region`, upscaled when it is smaller than the
/// recognizer's minimum input. `None` when no pixel of the region lies
/// inside the image.
fn face_crop(gray: &GrayImage, region: &DetectedRegion, params: &LbphParams) -> Option<GrayImage> {
    let region = region.clamped(gray.width(), gray.height());
    if region.area() == 0 {
        return None;
    }

    let crop = imageops::crop_imm(gray, region.x, region.y, region.width, region.height).to_image();
    let (min_w, min_h) = params.min_input();
    if crop.width() >= min_w && crop.height() >= min_h {
        return Some(crop);
    }

    let (w, h) = (crop.width().max(min_w), crop.height().max(min_h));
    tracing::debug!(from = ?crop.dimensions(), to = ?(w, h), "upscaling small face region");
    Some(imageops::resize(&crop, w, h, FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::AppearanceModel;
    use image::DynamicImage;

    /// Reports the same regions for every image.
    struct FixedDetector(Vec<DetectedRegion>);

    impl FaceDetector for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&self, _image: &GrayImage) -> Result<Vec<DetectedRegion>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    fn pattern(w: u32, h: u32, seed: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| image::Luma([((x * seed + y * (seed + 2) + x * y) % 256) as u8]))
    }

    fn png(img: &GrayImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img.clone())
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn trained_on(face: &GrayImage) -> TrainedModel {
        let model = AppearanceModel::train(&[(face.clone(), 0), (pattern(40, 40, 9), 1)]).unwrap();
        TrainedModel::new(model, LabelTable::from_names(["Alice", "Bob"]))
    }

    #[test]
    fn test_untrained_fails_before_decode() {
        let pipeline = RecognitionPipeline::new(Box::new(FixedDetector(vec![])));
        assert!(!pipeline.is_loaded());
        let err = pipeline.recognize(b"not an image").err().unwrap();
        assert!(matches!(err, PipelineError::ModelNotTrained));
        assert_eq!(err.kind(), ErrorKind::ModelNotTrained);
    }

    #[test]
    fn test_invalid_image() {
        let face = pattern(40, 40, 3);
        let pipeline = RecognitionPipeline::new(Box::new(FixedDetector(vec![])));
        pipeline.publish(trained_on(&face));

        let err = pipeline.recognize(b"not an image").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidImage);
    }

    #[test]
    fn test_no_faces() {
        let face = pattern(40, 40, 3);
        let pipeline = RecognitionPipeline::new(Box::new(FixedDetector(vec![])));
        pipeline.publish(trained_on(&face));

        let recognition = pipeline.recognize(&png(&face)).unwrap();
        assert_eq!(recognition.total_faces, 0);
        assert!(recognition.results.is_empty());
        assert_eq!(recognition.annotated.dimensions(), (40, 40));
    }

    #[test]
    fn test_exact_face_is_matched() {
        let face = pattern(40, 40, 3);
        let mut scene = GrayImage::new(100, 80);
        imageops::replace(&mut scene, &face, 30, 20);

        let pipeline = RecognitionPipeline::new(Box::new(FixedDetector(vec![DetectedRegion::new(30, 20, 40, 40)])));
        pipeline.publish(trained_on(&face));

        let recognition = pipeline.recognize(&png(&scene)).unwrap();
        assert_eq!(recognition.total_faces, 1);
        let r = &recognition.results[0];
        assert_eq!(r.predicted_name, "Alice");
        assert_eq!(r.confidence_percent, 100);
        assert!(r.matched);
        assert_eq!(*recognition.annotated.get_pixel(30, 20), image::Rgb([0, 255, 0]));
    }

    #[test]
    fn test_small_region_is_upscaled_not_fatal() {
        let face = pattern(40, 40, 3);
        let regions = vec![DetectedRegion::new(0, 0, 40, 40), DetectedRegion::new(0, 0, 5, 5)];
        let pipeline = RecognitionPipeline::new(Box::new(FixedDetector(regions)));
        pipeline.publish(trained_on(&face));

        let recognition = pipeline.recognize(&png(&face)).unwrap();
        assert_eq!(recognition.total_faces, 2);
        assert_eq!(recognition.results.len(), 2);
        assert_eq!(recognition.results[0].predicted_name, "Alice");
        assert!(recognition.results[0].matched);
        assert_eq!(recognition.results[1].region, DetectedRegion::new(0, 0, 5, 5));
    }

    #[test]
    fn test_empty_region_is_skipped() {
        let face = pattern(40, 40, 3);
        let regions = vec![
            DetectedRegion::new(0, 0, 40, 40),
            DetectedRegion::new(10, 10, 0, 12),
            DetectedRegion::new(60, 60, 20, 20),
        ];
        let pipeline = RecognitionPipeline::new(Box::new(FixedDetector(regions)));
        pipeline.publish(trained_on(&face));

        let recognition = pipeline.recognize(&png(&face)).unwrap();
        assert_eq!(recognition.total_faces, 3);
        assert_eq!(recognition.results.len(), 1);
        assert_eq!(recognition.results[0].predicted_name, "Alice");
    }

    #[test]
    fn test_face_crop_sizes() {
        let gray = pattern(40, 40, 3);
        let params = LbphParams::default();

        let crop = face_crop(&gray, &DetectedRegion::new(2, 2, 5, 30), &params).unwrap();
        assert_eq!(crop.dimensions(), (10, 30));

        let crop = face_crop(&gray, &DetectedRegion::new(30, 30, 20, 20), &params).unwrap();
        assert_eq!(crop.dimensions(), (10, 10));

        assert!(face_crop(&gray, &DetectedRegion::new(40, 0, 8, 8), &params).is_none());
    }

    #[test]
    fn test_threshold_override_rejects() {
        let face = pattern(40, 40, 3);
        let pipeline = RecognitionPipeline::new(Box::new(FixedDetector(vec![DetectedRegion::new(0, 0, 40, 40)])))
            .with_accept_threshold(100);
        pipeline.publish(trained_on(&face));

        let recognition = pipeline.recognize(&png(&face)).unwrap();
        let r = &recognition.results[0];
        assert_eq!(r.confidence_percent, 100);
        assert!(!r.matched);
        assert_eq!(*recognition.annotated.get_pixel(0, 0), image::Rgb([255, 0, 0]));
    }

    #[test]
    fn test_unmapped_label_is_unknown() {
        let face = pattern(40, 40, 3);
        let model = AppearanceModel::train(&[(face.clone(), 5)]).unwrap();
        let pipeline = RecognitionPipeline::new(Box::new(FixedDetector(vec![DetectedRegion::new(0, 0, 40, 40)])));
        pipeline.publish(TrainedModel::new(model, LabelTable::from_names(["Alice"])));

        let recognition = pipeline.recognize(&png(&face)).unwrap();
        assert_eq!(recognition.results[0].predicted_name, crate::types::UNKNOWN_NAME);
    }

    #[test]
    fn test_snapshot_survives_republish() {
        let face = pattern(40, 40, 3);
        let pipeline = RecognitionPipeline::new(Box::new(FixedDetector(vec![])));
        pipeline.publish(trained_on(&face));

        let held = pipeline.snapshot().unwrap();
        let model = AppearanceModel::train(&[(face.clone(), 0)]).unwrap();
        pipeline.publish(TrainedModel::new(model, LabelTable::from_names(["Carol"])));

        assert_eq!(held.labels.name(0), Some("Alice"));
        assert_eq!(pipeline.labels().name(0), Some("Carol"));
    }

    #[test]
    fn test_write_annotated() {
        let face = pattern(40, 40, 3);
        let pipeline = RecognitionPipeline::new(Box::new(FixedDetector(vec![DetectedRegion::new(0, 0, 40, 40)])));
        pipeline.publish(trained_on(&face));
        let recognition = pipeline.recognize(&png(&face)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = recognition
            .write_annotated(&dir.path().join("matched"), "matched_face.png")
            .unwrap();
        assert!(path.ends_with("matched/matched_face.png"));
        let reread = image::open(&path).unwrap().to_rgb8();
        assert_eq!(reread.dimensions(), (40, 40));
    }
}
