use anyhow::{Context, Result};
use gstreamer as gst;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use wildwatch::api::host_filter::AllowedHosts;
use wildwatch::api::rest::{AppState, RestApi};
use wildwatch::capture::GstSourceFactory;
use wildwatch::config;
use wildwatch::db::repositories::{DetectionStore, UserStore};
use wildwatch::db::DatabaseService;
use wildwatch::detector::{ModelDetector, RemoteModel};
use wildwatch::pipeline::FramePipeline;
use wildwatch::security::auth::AuthService;
use wildwatch::services::RetentionService;

/// First CLI argument, else `WILDWATCH_CONFIG`
fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("WILDWATCH_CONFIG"))
        .map(PathBuf::from)
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
}

async fn run_app() -> Result<()> {
    let mut config = config::load_config(config_path().as_deref())?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;

    init_logging(config.debug);
    info!("Starting WildWatch monitoring dashboard");

    if config.uses_development_secret() {
        warn!("Using the built-in development secret key, set WILDWATCH_SECRET_KEY before deploying");
    }

    // Initialize GStreamer
    gst::init()?;
    info!("GStreamer initialized successfully");

    let database = DatabaseService::new(&config.database)
        .await
        .context("Database unavailable")?;
    let detections: Arc<dyn DetectionStore> = Arc::new(database.detections());
    let users: Arc<dyn UserStore> = Arc::new(database.users());

    let auth_service = Arc::new(AuthService::new(users, &config.security));
    auth_service.ensure_default_admin().await?;

    let model = RemoteModel::connect(&config.detector, config.camera.jpeg_quality)
        .await
        .context("Failed to connect to the detection model")?;
    let detector = Arc::new(ModelDetector::new(model));

    let pipeline = Arc::new(FramePipeline::new(
        detector,
        Arc::clone(&detections),
        config.detection.default_location,
        config.camera.jpeg_quality,
    ));

    let sources = Arc::new(GstSourceFactory::from_config(&config.camera)?);
    info!("Live feed source: {}", sources.spec());

    let retention = Arc::new(RetentionService::new(
        config.retention.clone(),
        Arc::clone(&detections),
    ));
    retention.start().await?;

    let state = AppState {
        detections,
        auth_service,
        pipeline,
        sources,
        allowed_hosts: Arc::new(AllowedHosts::new(&config.api.allowed_hosts, config.debug)),
    };
    let http_server = RestApi::new(&config.api, state)?;

    tokio::select! {
        result = http_server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_app()) {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
