//! Training a fresh model from a dataset.

use crate::dataset::{DatasetError, DatasetIndex, DatasetProvider};
use crate::recognizer::{AppearanceModel, LbphParams, ModelError};
use crate::store::TrainedModel;
use crate::types::ErrorKind;
use image::GrayImage;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("No valid images found in dataset")]
    NoValidImages,
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl TrainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrainError::NoValidImages => ErrorKind::EmptyTrainingSet,
            TrainError::Dataset(e) => e.kind(),
            TrainError::Model(ModelError::EmptyTrainingSet) => ErrorKind::EmptyTrainingSet,
            TrainError::Model(ModelError::InvalidInputShape(_)) => ErrorKind::InvalidInputShape,
            TrainError::Model(_) => ErrorKind::ModelLoadError,
        }
    }
}

/// Counts reported after a successful training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrainReport {
    /// Images that actually contributed to the model.
    pub images: usize,
    /// Distinct people in the label table.
    pub people: usize,
}

impl TrainReport {
    pub fn message(&self) -> String {
        format!(
            "Model trained on {} images from {} people",
            self.images, self.people
        )
    }
}

/// Build a new model from every usable image in the dataset.
///
/// Labels are assigned to every person in the manifest, in first-seen order,
/// even when none of their images can be read. Unreadable or undersized
/// images are skipped with a warning; training fails only when nothing is
/// left.
pub fn train_from_dataset(
    provider: &dyn DatasetProvider,
    params: LbphParams,
) -> Result<(TrainedModel, TrainReport), TrainError> {
    params.validate()?;
    let index = DatasetIndex::load(provider)?;
    provider.check_image_root()?;

    let labels = index.label_table();

    let mut faces: Vec<(GrayImage, u32)> = Vec::with_capacity(index.len());
    for entry in index.entries() {
        let image = match provider.open_image(&entry.image_reference) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                tracing::warn!(image = %entry.image_reference, error = %e, "skipping image");
                continue;
            }
        };
        if let Err(e) = params.check_input(image.width(), image.height()) {
            tracing::warn!(image = %entry.image_reference, error = %e, "skipping image");
            continue;
        }
        let Some(label) = labels.label_of(&entry.person_name) else {
            continue;
        };
        faces.push((image, label));
    }

    if faces.is_empty() {
        return Err(TrainError::NoValidImages);
    }

    let model = AppearanceModel::train_with(params, &faces)?;
    let report = TrainReport {
        images: faces.len(),
        people: labels.len(),
    };

    tracing::info!(
        images = report.images,
        skipped = index.len() - report.images,
        people = report.people,
        "training complete"
    );

    Ok((TrainedModel::new(model, labels), report))
}
