use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use facematch_core::dataset::{self, DatasetIndex};
use facematch_core::types::ACCEPT_THRESHOLD;
use facematch_core::{Annotator, FileDataset, HaarCascadeDetector, LbphParams, ModelStore, RecognitionPipeline};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facematch", version, about = "Face recognition from a labelled image dataset")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a CSV manifest from the image filenames in a folder
    Manifest {
        #[command(flatten)]
        dataset: DatasetArgs,
    },
    /// Train a model from the manifest and save it
    Train {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Recognize faces in an image and write an annotated copy
    Recognize {
        /// Image to recognize
        image: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
        /// OpenCV Haar cascade XML
        #[arg(long, env = "FACEMATCH_CASCADE_PATH")]
        cascade: Option<PathBuf>,
        /// Font for result labels; boxes only when omitted
        #[arg(long, env = "FACEMATCH_FONT_PATH")]
        font: Option<PathBuf>,
        /// Directory for the annotated image
        #[arg(long, env = "FACEMATCH_MATCH_DIR", default_value = "static/matched")]
        output_dir: PathBuf,
        /// Confidence a face must exceed to count as a match
        #[arg(long, env = "FACEMATCH_ACCEPT_THRESHOLD", default_value_t = ACCEPT_THRESHOLD)]
        threshold: u8,
    },
    /// Show whether a model is trained and what it knows
    Status {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Show per-person image counts from the manifest
    DatasetInfo {
        #[command(flatten)]
        dataset: DatasetArgs,
    },
}

#[derive(Args)]
struct DatasetArgs {
    /// CSV manifest of image filename, person name rows
    #[arg(long, env = "FACEMATCH_MANIFEST", default_value = "dataset.csv")]
    manifest: PathBuf,
    /// Folder holding the dataset images
    #[arg(long, env = "FACEMATCH_IMAGES_DIR", default_value = "dataset")]
    images_dir: PathBuf,
}

#[derive(Args)]
struct ModelArgs {
    #[arg(long, env = "FACEMATCH_MODEL_PATH", default_value = "face_model.yml")]
    model_path: PathBuf,
    #[arg(long, env = "FACEMATCH_LABELS_PATH", default_value = "labels.json")]
    labels_path: PathBuf,
}

impl ModelArgs {
    fn store(&self) -> ModelStore {
        ModelStore::new(&self.model_path, &self.labels_path)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Manifest { dataset } => {
            let rows = dataset::generate_manifest(&dataset.images_dir)?;
            println!("Found {} image files", rows.len());
            for row in &rows {
                println!("  {} -> {}", row.image_reference, row.person_name);
            }
            dataset::write_manifest(&dataset.manifest, &rows)?;
            println!(
                "Created {} with {} entries",
                dataset.manifest.display(),
                rows.len()
            );
        }
        Commands::Train { dataset, model } => {
            let provider = FileDataset::new(&dataset.manifest, &dataset.images_dir);
            let (trained, report) =
                facematch_core::train_from_dataset(&provider, LbphParams::default())?;
            model.store().save(&trained)?;
            println!("{}", report.message());
        }
        Commands::Recognize {
            image,
            model,
            cascade,
            font,
            output_dir,
            threshold,
        } => {
            let cascade = cascade.unwrap_or_else(facematch_core::default_cascade_path);
            recognize(&image, &model, &cascade, font.as_deref(), &output_dir, threshold)?;
        }
        Commands::Status { dataset, model } => {
            let store = model.store();
            let stats = DatasetIndex::stats_of(&FileDataset::new(&dataset.manifest, &dataset.images_dir))?;
            let labels = if store.is_trained() {
                store.load()?.labels
            } else {
                Default::default()
            };
            let status = serde_json::json!({
                "model_trained": store.is_trained(),
                "total_images": stats.total_images,
                "people_count": stats.people_count,
                "labels": labels,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::DatasetInfo { dataset } => {
            let stats = DatasetIndex::stats_of(&FileDataset::new(&dataset.manifest, &dataset.images_dir))?;
            let info = serde_json::json!({
                "total_images": stats.total_images,
                "people": stats.per_person,
                "people_count": stats.people_count,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}

fn recognize(
    image: &Path,
    model: &ModelArgs,
    cascade: &Path,
    font: Option<&Path>,
    output_dir: &Path,
    threshold: u8,
) -> Result<()> {
    let store = model.store();
    if !store.is_trained() {
        bail!("Model not trained. Train first");
    }

    let detector = HaarCascadeDetector::load(cascade)?;
    let annotator = match font {
        Some(path) => Annotator::load_font(path)?,
        None => Annotator::new(),
    };
    let pipeline = RecognitionPipeline::new(Box::new(detector))
        .with_accept_threshold(threshold)
        .with_annotator(annotator);
    pipeline.publish(store.load()?);

    let bytes = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let recognition = pipeline.recognize(&bytes)?;

    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("image path has no file name")?;
    let written = recognition.write_annotated(output_dir, &format!("matched_{file_name}"))?;

    let results: Vec<_> = recognition
        .results
        .iter()
        .map(|r| {
            serde_json::json!({
                "name": r.predicted_name,
                "confidence": r.confidence_percent,
                "matched": r.matched,
                "region": r.region,
            })
        })
        .collect();
    let output = serde_json::json!({
        "results": results,
        "matched_image": written,
        "total_faces": recognition.total_faces,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
