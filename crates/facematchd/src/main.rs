use anyhow::{Context, Result};
use facematch_core::{Annotator, FileDataset, HaarCascadeDetector, LbphParams, ModelStore, RecognitionPipeline};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facematchd starting");

    let config = config::Config::from_env();

    // Detection is useless without a cascade, so refuse to start.
    let detector = HaarCascadeDetector::load(&config.cascade_path)
        .with_context(|| format!("loading cascade {}", config.cascade_path.display()))?;

    let annotator = match &config.font_path {
        Some(path) => Annotator::load_font(path)
            .with_context(|| format!("loading font {}", path.display()))?,
        None => {
            tracing::info!("FACEMATCH_FONT_PATH not set; annotated images get boxes only");
            Annotator::new()
        }
    };

    let pipeline = Arc::new(
        RecognitionPipeline::new(Box::new(detector))
            .with_accept_threshold(config.accept_threshold)
            .with_annotator(annotator),
    );

    let store = ModelStore::new(&config.model_path, &config.labels_path);
    if store.is_trained() {
        match store.load() {
            Ok(trained) => {
                pipeline.publish(trained);
                tracing::info!("Model loaded successfully");
            }
            Err(e) => tracing::warn!(error = %e, "stored model could not be loaded; retrain to recover"),
        }
    } else {
        tracing::info!("No trained model found. Train first!");
    }

    let dataset = Arc::new(FileDataset::new(&config.manifest_path, &config.images_dir));
    let engine = engine::spawn_engine(pipeline, store, dataset, LbphParams::default())
        .context("spawning engine thread")?;

    for dir in [&config.upload_dir, &config.match_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let state = Arc::new(http::AppState {
        engine,
        upload_dir: config.upload_dir.clone(),
        match_dir: config.match_dir.clone(),
    });
    let app = http::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "facematchd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("facematchd shutting down");
        })
        .await?;

    Ok(())
}
