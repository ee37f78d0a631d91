use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Confidence (percent) a prediction must strictly exceed to count as a match.
pub const ACCEPT_THRESHOLD: u8 = 70;

/// Name reported for a label that has no entry in the label table.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Axis-aligned face region in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DetectedRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Clip the region so it lies within a `width` × `height` image.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }
}

/// Outcome of scoring one detected region against the appearance model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub region: DetectedRegion,
    pub predicted_name: String,
    pub confidence_percent: u8,
    pub matched: bool,
    /// Raw dissimilarity from the appearance model (lower is better).
    pub dissimilarity: f64,
}

/// Caller-facing error classification, independent of any transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidManifest,
    EmptyTrainingSet,
    InvalidImage,
    InvalidInputShape,
    ModelNotTrained,
    ModelLoadError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidManifest => "InvalidManifest",
            ErrorKind::EmptyTrainingSet => "EmptyTrainingSet",
            ErrorKind::InvalidImage => "InvalidImage",
            ErrorKind::InvalidInputShape => "InvalidInputShape",
            ErrorKind::ModelNotTrained => "ModelNotTrained",
            ErrorKind::ModelLoadError => "ModelLoadError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a dissimilarity score to a 0–100 confidence.
///
/// `100 - dissimilarity`, rounded half-to-even and clamped to `[0, 100]`.
/// Dissimilarities above 100 therefore report 0 rather than a negative value.
pub fn confidence_percent(dissimilarity: f64) -> u8 {
    if dissimilarity.is_nan() {
        return 0;
    }
    (100.0 - dissimilarity).round_ties_even().clamp(0.0, 100.0) as u8
}

/// Accept/reject decision. Strictly greater than the threshold.
pub fn is_accepted(confidence_percent: u8, threshold: u8) -> bool {
    confidence_percent > threshold
}

/// Dense integer label → person name, assigned in first-seen order.
///
/// Labels are only meaningful within one trained model: a retrain over a
/// reordered manifest may hand the same integer to a different person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelTable {
    names: BTreeMap<u32, String>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from person names, assigning labels by first appearance.
    pub fn from_names<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut table = Self::new();
        for name in names {
            table.assign(name);
        }
        table
    }

    /// Return the label for `name`, assigning the next free one if unseen.
    pub fn assign(&mut self, name: &str) -> u32 {
        if let Some(label) = self.label_of(name) {
            return label;
        }
        let label = self.names.len() as u32;
        self.names.insert(label, name.to_string());
        label
    }

    pub fn label_of(&self, name: &str) -> Option<u32> {
        self.names
            .iter()
            .find_map(|(label, n)| (n == name).then_some(*label))
    }

    pub fn name(&self, label: u32) -> Option<&str> {
        self.names.get(&label).map(String::as_str)
    }

    /// Name for `label`, or [`UNKNOWN_NAME`] when unmapped.
    pub fn resolve(&self, label: u32) -> &str {
        self.name(label).unwrap_or(UNKNOWN_NAME)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.names.iter().map(|(l, n)| (*l, n.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<u32, String> {
        &self.names
    }
}
