//! Persistence of the trained model and its label table.
//!
//! Two artifacts live side by side: the OpenCV recognizer state (YAML by
//! default) and the label → name JSON table. Both are written atomically
//! (temp file + rename) and loaded together or not at all.

use crate::recognizer::{AppearanceModel, ModelError};
use crate::types::{ErrorKind, LabelTable};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ModelLoadError
    }
}

/// A trained appearance model together with the labels it was trained on.
///
/// Always handled as one value so the two never drift apart.
#[derive(Debug)]
pub struct TrainedModel {
    pub model: AppearanceModel,
    pub labels: LabelTable,
}

impl TrainedModel {
    pub fn new(model: AppearanceModel, labels: LabelTable) -> Self {
        Self { model, labels }
    }
}

/// File locations of the model and label artifacts.
#[derive(Debug, Clone)]
pub struct ModelStore {
    model_path: PathBuf,
    labels_path: PathBuf,
}

impl ModelStore {
    pub fn new(model_path: impl Into<PathBuf>, labels_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            labels_path: labels_path.into(),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn labels_path(&self) -> &Path {
        &self.labels_path
    }

    /// Both artifacts are present. Does not validate their contents.
    pub fn is_trained(&self) -> bool {
        self.model_path.is_file() && self.labels_path.is_file()
    }

    /// Persist both artifacts, replacing any previous ones.
    pub fn save(&self, trained: &TrainedModel) -> Result<(), StoreError> {
        write_atomic(&self.model_path, |tmp| Ok(trained.model.save(tmp)?))?;
        write_atomic(&self.labels_path, |tmp| {
            let mut writer = BufWriter::new(File::create(tmp)?);
            serde_json::to_writer_pretty(&mut writer, &trained.labels)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        })?;

        tracing::info!(
            model = %self.model_path.display(),
            labels = %self.labels_path.display(),
            samples = trained.model.sample_count(),
            people = trained.labels.len(),
            "model saved"
        );
        Ok(())
    }

    /// Load both artifacts. Any missing, unreadable or inconsistent artifact
    /// fails the whole load, including a label table that cannot name every
    /// label the model predicts.
    pub fn load(&self) -> Result<TrainedModel, StoreError> {
        if !self.model_path.is_file() {
            return Err(StoreError::ModelLoad(format!(
                "{}: no such file",
                self.model_path.display()
            )));
        }
        let model = AppearanceModel::load(&self.model_path).map_err(|e| {
            StoreError::ModelLoad(format!("{}: {e}", self.model_path.display()))
        })?;

        let labels_file = File::open(&self.labels_path)
            .map_err(|e| StoreError::ModelLoad(format!("{}: {e}", self.labels_path.display())))?;
        let labels: LabelTable = serde_json::from_reader(BufReader::new(labels_file)).map_err(|e| {
            StoreError::ModelLoad(format!("{}: {e}", self.labels_path.display()))
        })?;

        let unnamed: Vec<u32> = model
            .labels()
            .iter()
            .copied()
            .filter(|&label| labels.name(label).is_none())
            .collect();
        if !unnamed.is_empty() {
            return Err(StoreError::ModelLoad(format!(
                "{}: no name for model label(s) {unnamed:?}",
                self.labels_path.display()
            )));
        }

        tracing::debug!(
            samples = model.sample_count(),
            people = labels.len(),
            trained_at = %model.trained_at(),
            "model loaded"
        );
        Ok(TrainedModel { model, labels })
    }
}

/// Hidden sibling of `path` that keeps its extension, so OpenCV picks the
/// same storage format for the temp file.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = OsString::from(".tmp-");
    name.push(path.file_name().unwrap_or_default());
    path.with_file_name(name)
}

/// Write through a temporary sibling file, then rename it over `path`.
fn write_atomic<F>(path: &Path, write: F) -> Result<(), StoreError>
where
    F: FnOnce(&Path) -> Result<(), StoreError>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_sibling(path);
    if let Err(e) = write(&tmp_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
