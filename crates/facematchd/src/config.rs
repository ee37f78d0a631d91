use facematch_core::types::ACCEPT_THRESHOLD;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:5000).
    pub bind: SocketAddr,
    /// CSV manifest of (image filename, person name) rows.
    pub manifest_path: PathBuf,
    /// Directory the manifest's image filenames are relative to.
    pub images_dir: PathBuf,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    /// Where uploaded query images are kept.
    pub upload_dir: PathBuf,
    /// Where annotated results are written and served from.
    pub match_dir: PathBuf,
    /// OpenCV Haar cascade XML for face detection.
    pub cascade_path: PathBuf,
    /// Optional TTF/OTF font for result labels. Boxes only when unset.
    pub font_path: Option<PathBuf>,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
    /// Confidence a face must exceed to count as a match.
    pub accept_threshold: u8,
}

impl Config {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let bind = std::env::var("FACEMATCH_BIND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_bind);

        let cascade_path = std::env::var("FACEMATCH_CASCADE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facematch_core::default_cascade_path());

        Self {
            bind,
            manifest_path: env_path("FACEMATCH_MANIFEST", "dataset.csv"),
            images_dir: env_path("FACEMATCH_IMAGES_DIR", "dataset"),
            model_path: env_path("FACEMATCH_MODEL_PATH", "face_model.yml"),
            labels_path: env_path("FACEMATCH_LABELS_PATH", "labels.json"),
            upload_dir: env_path("FACEMATCH_UPLOAD_DIR", "static/uploads"),
            match_dir: env_path("FACEMATCH_MATCH_DIR", "static/matched"),
            cascade_path,
            font_path: std::env::var("FACEMATCH_FONT_PATH")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            max_upload_bytes: env_usize("FACEMATCH_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            accept_threshold: env_u8("FACEMATCH_ACCEPT_THRESHOLD", ACCEPT_THRESHOLD),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u8(key: &str, default: u8) -> u8 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
