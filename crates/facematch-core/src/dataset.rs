//! Dataset index: turns a manifest of (image, person) rows into ordered
//! training entries and aggregate statistics.
//!
//! The manifest source is abstract ([`DatasetProvider`]): [`FileDataset`]
//! reads a CSV manifest plus an images directory, [`MemoryDataset`] holds
//! everything in memory.

use crate::types::{ErrorKind, LabelTable};
use image::DynamicImage;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MANIFEST_HEADER: [&str; 2] = ["image_filename", "person_name"];
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("no trainable data: {0}")]
    NoTrainableData(String),
    #[error("images folder not found: {}", .0.display())]
    ImageRootMissing(PathBuf),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("could not decode {reference}: {source}")]
    ImageUnreadable {
        reference: String,
        #[source]
        source: image::ImageError,
    },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl DatasetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatasetError::NoTrainableData(_) => ErrorKind::EmptyTrainingSet,
            DatasetError::ImageNotFound(_) | DatasetError::ImageUnreadable { .. } => {
                ErrorKind::InvalidImage
            }
            DatasetError::InvalidManifest(_)
            | DatasetError::ImageRootMissing(_)
            | DatasetError::Csv(_)
            | DatasetError::Io(_) => ErrorKind::InvalidManifest,
        }
    }
}

/// One raw manifest row. Fields may be empty; [`DatasetIndex`] filters them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    pub image_reference: String,
    pub person_name: String,
}

impl ManifestRow {
    pub fn new(image_reference: impl Into<String>, person_name: impl Into<String>) -> Self {
        Self {
            image_reference: image_reference.into(),
            person_name: person_name.into(),
        }
    }
}

/// A usable (image, person) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetEntry {
    pub image_reference: String,
    pub person_name: String,
}

/// Aggregate manifest statistics, computed without touching any image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetStats {
    pub total_images: usize,
    pub people_count: usize,
    /// Image count per person, in order of first appearance.
    pub per_person: IndexMap<String, usize>,
}

/// Source of manifest rows and the images they reference.
pub trait DatasetProvider: Send + Sync {
    /// Manifest rows in order, or `None` when no manifest exists.
    fn manifest(&self) -> Result<Option<Vec<ManifestRow>>, DatasetError>;

    /// Open the image behind a manifest reference.
    fn open_image(&self, reference: &str) -> Result<DynamicImage, DatasetError>;

    /// Check that referenced images can be reached at all before training.
    fn check_image_root(&self) -> Result<(), DatasetError> {
        Ok(())
    }
}

/// Ordered, filtered manifest entries plus statistics.
#[derive(Debug, Clone, Default)]
pub struct DatasetIndex {
    entries: Vec<DatasetEntry>,
    stats: DatasetStats,
}

impl DatasetIndex {
    /// Build an index from raw rows, dropping rows with an empty field.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = ManifestRow>,
    {
        let mut entries = Vec::new();
        let mut per_person: IndexMap<String, usize> = IndexMap::new();

        for row in rows {
            let image_reference = row.image_reference.trim();
            let person_name = row.person_name.trim();
            if image_reference.is_empty() || person_name.is_empty() {
                continue;
            }
            *per_person.entry(person_name.to_string()).or_insert(0) += 1;
            entries.push(DatasetEntry {
                image_reference: image_reference.to_string(),
                person_name: person_name.to_string(),
            });
        }

        let stats = DatasetStats {
            total_images: entries.len(),
            people_count: per_person.len(),
            per_person,
        };

        Self { entries, stats }
    }

    /// Read the provider's manifest. Absent or empty manifests are
    /// [`DatasetError::NoTrainableData`], never an empty success.
    pub fn load(provider: &dyn DatasetProvider) -> Result<Self, DatasetError> {
        let rows = provider
            .manifest()?
            .ok_or_else(|| DatasetError::NoTrainableData("manifest not found".into()))?;
        let index = Self::from_rows(rows);
        if index.entries.is_empty() {
            return Err(DatasetError::NoTrainableData(
                "manifest has no usable rows".into(),
            ));
        }
        Ok(index)
    }

    /// Statistics for a status surface; a missing or empty manifest reports zeros.
    pub fn stats_of(provider: &dyn DatasetProvider) -> Result<DatasetStats, DatasetError> {
        match Self::load(provider) {
            Ok(index) => Ok(index.stats),
            Err(DatasetError::NoTrainableData(_)) => Ok(DatasetStats::default()),
            Err(e) => Err(e),
        }
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    pub fn stats(&self) -> &DatasetStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in first-seen order of person name.
    pub fn label_table(&self) -> LabelTable {
        LabelTable::from_names(self.entries.iter().map(|e| e.person_name.as_str()))
    }
}

/// In-memory dataset, mainly for tests and embedding.
#[derive(Default)]
pub struct MemoryDataset {
    rows: Option<Vec<ManifestRow>>,
    images: HashMap<String, DynamicImage>,
}

impl MemoryDataset {
    /// A dataset with an (empty) manifest.
    pub fn new() -> Self {
        Self {
            rows: Some(Vec::new()),
            images: HashMap::new(),
        }
    }

    /// A dataset whose manifest does not exist.
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn with_row(mut self, image_reference: &str, person_name: &str) -> Self {
        self.rows
            .get_or_insert_with(Vec::new)
            .push(ManifestRow::new(image_reference, person_name));
        self
    }

    pub fn with_image(mut self, image_reference: &str, image: DynamicImage) -> Self {
        self.images.insert(image_reference.to_string(), image);
        self
    }

    /// Add a manifest row together with the image it references.
    pub fn with_entry(self, image_reference: &str, person_name: &str, image: DynamicImage) -> Self {
        self.with_row(image_reference, person_name)
            .with_image(image_reference, image)
    }
}

impl DatasetProvider for MemoryDataset {
    fn manifest(&self) -> Result<Option<Vec<ManifestRow>>, DatasetError> {
        Ok(self.rows.clone())
    }

    fn open_image(&self, reference: &str) -> Result<DynamicImage, DatasetError> {
        self.images
            .get(reference)
            .cloned()
            .ok_or_else(|| DatasetError::ImageNotFound(reference.to_string()))
    }
}

/// CSV manifest on disk plus a directory holding the referenced images.
///
/// The first CSV row is a header and is always skipped.
pub struct FileDataset {
    manifest_path: PathBuf,
    images_dir: PathBuf,
}

impl FileDataset {
    pub fn new(manifest_path: impl Into<PathBuf>, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            images_dir: images_dir.into(),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }
}

impl DatasetProvider for FileDataset {
    fn manifest(&self) -> Result<Option<Vec<ManifestRow>>, DatasetError> {
        if !self.manifest_path.exists() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.manifest_path)
            .map_err(|e| DatasetError::InvalidManifest(format!("{}: {e}", self.manifest_path.display())))?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                DatasetError::InvalidManifest(format!("{}: {e}", self.manifest_path.display()))
            })?;
            if record.len() < 2 {
                continue;
            }
            rows.push(ManifestRow::new(&record[0], &record[1]));
        }

        tracing::debug!(path = %self.manifest_path.display(), rows = rows.len(), "manifest read");
        Ok(Some(rows))
    }

    fn open_image(&self, reference: &str) -> Result<DynamicImage, DatasetError> {
        let path = self.images_dir.join(reference);
        if !path.exists() {
            return Err(DatasetError::ImageNotFound(path.display().to_string()));
        }
        image::open(&path).map_err(|source| DatasetError::ImageUnreadable {
            reference: path.display().to_string(),
            source,
        })
    }

    fn check_image_root(&self) -> Result<(), DatasetError> {
        if self.images_dir.is_dir() {
            Ok(())
        } else {
            Err(DatasetError::ImageRootMissing(self.images_dir.clone()))
        }
    }
}

/// Derive a person name from an image filename.
///
/// The stem loses its last `_suffix` (usually a sequence number); the rest is
/// split on `_` and each word capitalized: `mary_jane_3.png` → `Mary Jane`.
pub fn person_name_from_filename(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name_part = match stem.rsplit_once('_') {
        Some((head, _)) => head,
        None => stem.as_str(),
    };

    name_part
        .trim()
        .split('_')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Build manifest rows from the image files in `images_dir`, sorted by name.
pub fn generate_manifest(images_dir: &Path) -> Result<Vec<ManifestRow>, DatasetError> {
    if !images_dir.is_dir() {
        return Err(DatasetError::ImageRootMissing(images_dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(images_dir)? {
        let path = entry?.path();
        if path.is_file() && has_image_extension(&path) {
            if let Some(name) = path.file_name() {
                files.push(name.to_string_lossy().into_owned());
            }
        }
    }

    if files.is_empty() {
        return Err(DatasetError::NoTrainableData(format!(
            "no image files found in {}",
            images_dir.display()
        )));
    }

    files.sort();
    Ok(files
        .into_iter()
        .map(|file| {
            let name = person_name_from_filename(&file);
            ManifestRow::new(file, name)
        })
        .collect())
}

/// Write rows as a CSV manifest with an `image_filename,person_name` header.
pub fn write_manifest(path: &Path, rows: &[ManifestRow]) -> Result<(), DatasetError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(MANIFEST_HEADER)?;
    for row in rows {
        writer.write_record([row.image_reference.as_str(), row.person_name.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}
