use facematch_core::dataset::{DatasetIndex, DatasetProvider, DatasetStats};
use facematch_core::pipeline::{PipelineError, Recognition, RecognitionPipeline};
use facematch_core::store::StoreError;
use facematch_core::training::{self, TrainError, TrainReport};
use facematch_core::types::ErrorKind;
use facematch_core::{LbphParams, ModelStore};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            EngineError::Train(e) => Some(e.kind()),
            EngineError::Store(e) => Some(e.kind()),
            EngineError::Pipeline(e) => Some(e.kind()),
            EngineError::Task(_) | EngineError::ChannelClosed => None,
        }
    }
}

/// Model and dataset summary for `/status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub model_trained: bool,
    pub total_images: usize,
    pub people_count: usize,
    pub labels: BTreeMap<u32, String>,
}

/// Per-person image counts for `/dataset-info`, in manifest order.
#[derive(Debug, Serialize)]
pub struct DatasetInfo {
    pub total_images: usize,
    pub people: IndexMap<String, usize>,
    pub people_count: usize,
}

/// Messages sent from HTTP handlers to the engine thread.
///
/// Everything that replaces the published model goes through here, so
/// model writes are serialized on one thread.
enum EngineRequest {
    Train {
        reply: oneshot::Sender<Result<TrainReport, EngineError>>,
    },
    Load {
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread and the shared pipeline.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    pipeline: Arc<RecognitionPipeline>,
    store: ModelStore,
    dataset: Arc<dyn DatasetProvider>,
}

impl EngineHandle {
    /// Retrain from the dataset, persist, and publish the new model.
    pub async fn train(&self) -> Result<TrainReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Train { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Publish the persisted model if nothing is published yet.
    ///
    /// Returns whether a model is available afterwards.
    pub async fn ensure_loaded(&self) -> Result<bool, EngineError> {
        if self.pipeline.is_loaded() {
            return Ok(true);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Load { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Run recognition on the blocking pool against the current snapshot.
    pub async fn recognize(&self, bytes: Vec<u8>) -> Result<Recognition, EngineError> {
        let pipeline = Arc::clone(&self.pipeline);
        let recognition = tokio::task::spawn_blocking(move || pipeline.recognize(&bytes)).await??;
        Ok(recognition)
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        let stats = self.dataset_stats().await?;
        Ok(StatusReport {
            model_trained: self.store.is_trained(),
            total_images: stats.total_images,
            people_count: stats.people_count,
            labels: self.pipeline.labels().as_map().clone(),
        })
    }

    pub async fn dataset_info(&self) -> Result<DatasetInfo, EngineError> {
        let stats = self.dataset_stats().await?;
        Ok(DatasetInfo {
            total_images: stats.total_images,
            people_count: stats.people_count,
            people: stats.per_person,
        })
    }

    /// Manifest statistics. An unreadable manifest reports zeros.
    async fn dataset_stats(&self) -> Result<DatasetStats, EngineError> {
        let dataset = Arc::clone(&self.dataset);
        let stats = tokio::task::spawn_blocking(move || {
            DatasetIndex::stats_of(dataset.as_ref()).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "could not read manifest");
                DatasetStats::default()
            })
        })
        .await?;
        Ok(stats)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns all model writes: training runs there, and a stored
/// model is published from there. Recognition does not pass through it.
pub fn spawn_engine(
    pipeline: Arc<RecognitionPipeline>,
    store: ModelStore,
    dataset: Arc<dyn DatasetProvider>,
    params: LbphParams,
) -> std::io::Result<EngineHandle> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    let worker_pipeline = Arc::clone(&pipeline);
    let worker_store = store.clone();
    let worker_dataset = Arc::clone(&dataset);

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Train { reply } => {
                        let result =
                            run_train(&worker_pipeline, &worker_store, worker_dataset.as_ref(), params);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Load { reply } => {
                        let result = run_load(&worker_pipeline, &worker_store);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        pipeline,
        store,
        dataset,
    })
}

/// Train, persist, then publish. A failure at any step leaves the
/// previously published model in place.
fn run_train(
    pipeline: &RecognitionPipeline,
    store: &ModelStore,
    dataset: &dyn DatasetProvider,
    params: LbphParams,
) -> Result<TrainReport, EngineError> {
    let (trained, report) = training::train_from_dataset(dataset, params)?;
    store.save(&trained)?;
    pipeline.publish(trained);
    tracing::info!(images = report.images, people = report.people, "model retrained");
    Ok(report)
}

fn run_load(pipeline: &RecognitionPipeline, store: &ModelStore) -> Result<bool, EngineError> {
    // A train request may have published while this one waited.
    if pipeline.is_loaded() {
        return Ok(true);
    }
    if !store.is_trained() {
        return Ok(false);
    }
    let trained = store.load()?;
    pipeline.publish(trained);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::detector::{DetectorError, FaceDetector};
    use facematch_core::types::DetectedRegion;
    use facematch_core::MemoryDataset;
    use image::{DynamicImage, GrayImage};

    struct WholeImage;

    impl FaceDetector for WholeImage {
        fn name(&self) -> &'static str {
            "whole-image"
        }

        fn detect(&self, image: &GrayImage) -> Result<Vec<DetectedRegion>, DetectorError> {
            Ok(vec![DetectedRegion::new(0, 0, image.width(), image.height())])
        }
    }

    fn face(seed: u32) -> GrayImage {
        GrayImage::from_fn(32, 32, |x, y| image::Luma([((x * seed + y * 3 + x * y) % 256) as u8]))
    }

    fn handle(dir: &std::path::Path, dataset: MemoryDataset) -> EngineHandle {
        let pipeline = Arc::new(RecognitionPipeline::new(Box::new(WholeImage)));
        let store = ModelStore::new(dir.join("face_model.yml"), dir.join("labels.json"));
        spawn_engine(pipeline, store, Arc::new(dataset), LbphParams::default()).unwrap()
    }

    fn png(img: &GrayImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_train_then_recognize() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = MemoryDataset::new()
            .with_entry("a.png", "Alice", DynamicImage::ImageLuma8(face(5)))
            .with_entry("b.png", "Bob", DynamicImage::ImageLuma8(face(13)));
        let engine = handle(dir.path(), dataset);

        let err = engine.recognize(png(&face(5))).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ModelNotTrained));

        let report = engine.train().await.unwrap();
        assert_eq!(report.message(), "Model trained on 2 images from 2 people");
        assert!(dir.path().join("face_model.yml").is_file());

        let recognition = engine.recognize(png(&face(5))).await.unwrap();
        assert_eq!(recognition.results[0].predicted_name, "Alice");
        assert!(recognition.results[0].matched);

        let status = engine.status().await.unwrap();
        assert!(status.model_trained);
        assert_eq!(status.total_images, 2);
        assert_eq!(status.labels.get(&1).map(String::as_str), Some("Bob"));
    }

    #[tokio::test]
    async fn test_failed_train_keeps_previous_model() {
        let dir = tempfile::tempdir().unwrap();
        let engine = handle(dir.path(), MemoryDataset::absent());

        let err = engine.train().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::EmptyTrainingSet));
        assert!(!engine.ensure_loaded().await.unwrap());

        let info = engine.dataset_info().await.unwrap();
        assert_eq!(info.total_images, 0);
        assert!(info.people.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_loaded_publishes_stored_model() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = || MemoryDataset::new().with_entry("a.png", "Alice", DynamicImage::ImageLuma8(face(5)));

        handle(dir.path(), dataset()).train().await.unwrap();

        // A fresh engine over the same artifacts starts empty.
        let engine = handle(dir.path(), dataset());
        assert!(engine.status().await.unwrap().labels.is_empty());
        assert!(engine.ensure_loaded().await.unwrap());
        assert_eq!(engine.status().await.unwrap().labels.get(&0).map(String::as_str), Some("Alice"));
    }
}
