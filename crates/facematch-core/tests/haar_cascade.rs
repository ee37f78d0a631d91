//! Detection with the frontal-face cascade installed alongside OpenCV.
//!
//! These tests need `haarcascade_frontalface_default.xml` (opencv-data on
//! Debian and Ubuntu). Set `FACEMATCH_CASCADE_PATH` to point elsewhere. The
//! portrait comes from OpenCV's sample data (`lena.jpg`, found through
//! `OPENCV_SAMPLES_DATA_PATH`) or from `FACEMATCH_TEST_PORTRAIT`.

use facematch_core::detector::decode_grayscale;
use facematch_core::{
    AppearanceModel, FaceDetector, HaarCascadeDetector, LabelTable, RecognitionPipeline, TrainedModel,
};
use image::{GrayImage, Luma};
use std::io::Cursor;
use std::path::PathBuf;

fn frontal_face_detector() -> Option<HaarCascadeDetector> {
    let path = std::env::var("FACEMATCH_CASCADE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| facematch_core::default_cascade_path());
    if !path.is_file() {
        eprintln!("frontal-face cascade not installed at {}; skipping", path.display());
        return None;
    }
    Some(HaarCascadeDetector::load(&path).unwrap())
}

fn portrait_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FACEMATCH_TEST_PORTRAIT") {
        return Some(PathBuf::from(path));
    }
    let found = opencv::core::find_file("lena.jpg", false, true).ok()?;
    if found.is_empty() {
        eprintln!("no portrait in OpenCV sample data; skipping");
        return None;
    }
    Some(PathBuf::from(found))
}

fn encode_png(img: &GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

#[test]
fn test_blank_image_has_no_faces() {
    let Some(detector) = frontal_face_detector() else {
        return;
    };

    let blank = GrayImage::from_pixel(320, 240, Luma([128]));
    assert!(detector.detect(&blank).unwrap().is_empty());

    let black = GrayImage::new(64, 64);
    assert!(detector.detect(&black).unwrap().is_empty());
}

#[test]
fn test_image_smaller_than_cascade_window() {
    let Some(detector) = frontal_face_detector() else {
        return;
    };
    assert!(detector.detect(&GrayImage::from_pixel(12, 12, Luma([90]))).unwrap().is_empty());
    assert!(detector.detect(&GrayImage::new(0, 0)).unwrap().is_empty());
}

#[test]
fn test_portrait_has_exactly_one_face() {
    let Some(detector) = frontal_face_detector() else {
        return;
    };
    let Some(path) = portrait_path() else {
        return;
    };

    let gray = decode_grayscale(&std::fs::read(&path).unwrap()).unwrap();
    let faces = detector.detect(&gray).unwrap();

    assert_eq!(faces.len(), 1, "{}: {faces:?}", path.display());
    let face = faces[0];
    assert!(face.area() > 0);
    assert!(face.x + face.width <= gray.width());
    assert!(face.y + face.height <= gray.height());
}

#[test]
fn test_pipeline_with_cascade_on_blank_image() {
    let Some(detector) = frontal_face_detector() else {
        return;
    };

    let sample = GrayImage::from_fn(40, 40, |x, y| Luma([((x * 7 + y * 13 + x * y) % 256) as u8]));
    let model = AppearanceModel::train(&[(sample, 0)]).unwrap();
    let pipeline = RecognitionPipeline::new(Box::new(detector));
    pipeline.publish(TrainedModel::new(model, LabelTable::from_names(["Alice"])));

    let recognition = pipeline
        .recognize(&encode_png(&GrayImage::from_pixel(200, 150, Luma([240]))))
        .unwrap();
    assert_eq!(recognition.total_faces, 0);
    assert!(recognition.results.is_empty());
    assert_eq!(recognition.annotated.dimensions(), (200, 150));
}
