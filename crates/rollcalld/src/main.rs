use anyhow::{Context, Result};
use rollcall_core::{EmbeddingExtractor, LandmarkExtractor, Pipeline, Roster};
use rollcall_hw::{is_stream_locator, Camera, MjpegStream};
use rollcall_models::{FaceEncoder, FaceMeshLandmarker, ModelPaths};
use rollcall_store::SqliteRosterStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

mod config;
mod report;

use config::Config;
use report::HttpReporter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    tracing::info!(
        video_source = %config.video_source,
        backend = %config.backend_url,
        report_mode = ?config.report_mode,
        attention = config.attention.name(),
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        "configuration loaded"
    );

    // Fail fast on missing models before touching the camera.
    let paths = ModelPaths::in_dir(&config.model_dir);
    let encoder = FaceEncoder::load(&paths.scrfd, &paths.arcface).context("loading face encoder")?;
    let roster = Roster::load_expecting(&SqliteRosterStore::new(&config.db_path), encoder.dimension());
    let landmarker = FaceMeshLandmarker::load(&paths.scrfd, &paths.face_mesh, config.max_landmark_faces)
        .context("loading face-mesh landmarker")?;
    let pipeline = Pipeline::new(encoder, landmarker, roster, config.pipeline());

    let reporter = HttpReporter::new(
        &config.backend_url,
        config.report_mode,
        config.attention,
        config.post_timeout,
        tokio::runtime::Handle::current(),
    )
    .context("building attendance client")?;

    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = oneshot::channel::<Result<()>>();

    let thread_stop = Arc::clone(&stop);
    let video_source = config.video_source.clone();
    let runtime = tokio::runtime::Handle::current();
    let worker = std::thread::Builder::new()
        .name("rollcall-pipeline".into())
        .spawn(move || {
            let mut pipeline = pipeline;
            let result = monitor(&mut pipeline, &video_source, &reporter, &thread_stop, runtime);
            drop(pipeline);
            tracing::info!("models released");
            let _ = done_tx.send(result);
        })
        .context("spawning pipeline thread")?;

    tracing::info!("rollcalld ready");

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            tracing::info!("stop requested");
            stop.store(true, Ordering::Relaxed);
            Ok(())
        }
        result = done_rx => result.unwrap_or_else(|_| Err(anyhow::anyhow!("pipeline thread exited"))),
    };
    stop.store(true, Ordering::Relaxed);

    tokio::task::spawn_blocking(move || worker.join())
        .await?
        .map_err(|_| anyhow::anyhow!("pipeline thread panicked"))?;

    tracing::info!("rollcalld stopped");
    outcome
}

/// Open the video source named by `locator` and run the pipeline on it until stopped.
fn monitor<E, L>(
    pipeline: &mut Pipeline<E, L>,
    locator: &str,
    reporter: &HttpReporter,
    stop: &AtomicBool,
    runtime: tokio::runtime::Handle,
) -> Result<()>
where
    E: EmbeddingExtractor,
    L: LandmarkExtractor,
{
    if is_stream_locator(locator) {
        let mut stream = MjpegStream::connect(locator, runtime)
            .with_context(|| format!("opening video stream {locator}"))?;
        tracing::info!(url = stream.url(), "video stream ready; monitoring");
        pipeline.run(&mut stream, reporter, stop);
    } else {
        let mut camera =
            Camera::open(locator).with_context(|| format!("opening video source {locator}"))?;
        tracing::info!(
            device = %camera.device_path,
            width = camera.width,
            height = camera.height,
            "camera ready; monitoring"
        );
        pipeline.run(&mut camera, reporter, stop);
    }
    Ok(())
}
