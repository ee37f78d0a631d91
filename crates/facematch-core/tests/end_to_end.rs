//! Train from files on disk, persist, reload, recognize.

use facematch_core::detector::{DetectorError, FaceDetector};
use facematch_core::pipeline::PipelineError;
use facematch_core::{
    train_from_dataset, DatasetIndex, DetectedRegion, ErrorKind, FileDataset, LbphParams, ModelStore,
    RecognitionPipeline,
};
use image::{GrayImage, Luma};
use std::io::Cursor;
use std::path::Path;

/// Reports the bounding box of all non-black pixels as a single face.
struct ForegroundDetector;

impl FaceDetector for ForegroundDetector {
    fn name(&self) -> &'static str {
        "foreground"
    }

    fn detect(&self, image: &GrayImage) -> Result<Vec<DetectedRegion>, DetectorError> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in image.enumerate_pixels() {
            if p[0] == 0 {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        Ok(bounds
            .map(|(x0, y0, x1, y1)| vec![DetectedRegion::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1)])
            .unwrap_or_default())
    }
}

fn face(seed: u32) -> GrayImage {
    GrayImage::from_fn(48, 48, |x, y| {
        Luma([(20 + (x * seed + y * (seed + 5) + (x ^ y) * 3) % 220) as u8])
    })
}

fn encode_png(img: &GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn write_dataset(root: &Path) -> FileDataset {
    let images = root.join("dataset");
    std::fs::create_dir_all(&images).unwrap();
    face(3).save(images.join("alice_1.png")).unwrap();
    face(4).save(images.join("alice_2.png")).unwrap();
    face(17).save(images.join("bob_1.png")).unwrap();

    let manifest = root.join("dataset.csv");
    std::fs::write(
        &manifest,
        "image_filename,person_name\nalice_1.png,Alice\nalice_2.png,Alice\nbob_1.png,Bob\n",
    )
    .unwrap();

    FileDataset::new(manifest, images)
}

#[test]
fn test_train_persist_and_recognize() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());

    let stats = DatasetIndex::stats_of(&dataset).unwrap();
    assert_eq!(stats.total_images, 3);
    assert_eq!(stats.people_count, 2);

    let (trained, report) = train_from_dataset(&dataset, LbphParams::default()).unwrap();
    assert_eq!(report.images, 3);
    assert_eq!(report.people, 2);
    assert_eq!(report.message(), "Model trained on 3 images from 2 people");

    let store = ModelStore::new(dir.path().join("face_model.yml"), dir.path().join("labels.json"));
    store.save(&trained).unwrap();
    assert!(store.is_trained());

    // Recognize with the reloaded artifacts, not the in-memory model.
    let pipeline = RecognitionPipeline::new(Box::new(ForegroundDetector));
    pipeline.publish(store.load().unwrap());

    let mut scene = GrayImage::new(160, 120);
    image::imageops::replace(&mut scene, &face(3), 60, 30);

    let recognition = pipeline.recognize(&encode_png(&scene)).unwrap();
    assert_eq!(recognition.total_faces, 1);
    assert_eq!(recognition.results.len(), 1);

    let alice = &recognition.results[0];
    assert_eq!(alice.region, DetectedRegion::new(60, 30, 48, 48));
    assert_eq!(alice.predicted_name, "Alice");
    assert_eq!(alice.confidence_percent, 100);
    assert!(alice.matched);

    let written = recognition
        .write_annotated(&dir.path().join("static/matched"), "matched_scene.png")
        .unwrap();
    assert!(written.is_file());
}

#[test]
fn test_image_without_faces() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let (trained, _) = train_from_dataset(&dataset, LbphParams::default()).unwrap();

    let pipeline = RecognitionPipeline::new(Box::new(ForegroundDetector));
    pipeline.publish(trained);

    let recognition = pipeline.recognize(&encode_png(&GrayImage::new(64, 64))).unwrap();
    assert_eq!(recognition.total_faces, 0);
    assert!(recognition.results.is_empty());
}

#[test]
fn test_untrained_rejects_before_decoding() {
    let pipeline = RecognitionPipeline::new(Box::new(ForegroundDetector));
    let err = pipeline.recognize(b"\x00\x01garbage").err().unwrap();
    assert!(matches!(err, PipelineError::ModelNotTrained));
    assert_eq!(err.kind(), ErrorKind::ModelNotTrained);
}

#[test]
fn test_retrain_replaces_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let pipeline = RecognitionPipeline::new(Box::new(ForegroundDetector));

    let (first, _) = train_from_dataset(&dataset, LbphParams::default()).unwrap();
    pipeline.publish(first);
    let before = pipeline.snapshot().unwrap();

    // Reordered manifest: Bob now comes first and takes label 0.
    std::fs::write(
        dataset.manifest_path(),
        "image_filename,person_name\nbob_1.png,Bob\nalice_1.png,Alice\n",
    )
    .unwrap();
    let (second, report) = train_from_dataset(&dataset, LbphParams::default()).unwrap();
    assert_eq!(report.images, 2);
    pipeline.publish(second);

    assert_eq!(before.labels.name(0), Some("Alice"));
    assert_eq!(pipeline.labels().name(0), Some("Bob"));

    let recognition = pipeline.recognize(&encode_png(&face(3))).unwrap();
    assert_eq!(recognition.results[0].predicted_name, "Alice");
}
