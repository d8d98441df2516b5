use actix_web::{App, HttpServer, web};
use detector_backend::config::DetectorConfig;
use detector_backend::inference::InferenceGateway;
use detector_backend::inference::local::LocalDetector;
use detector_backend::inference::server::configure;
use std::io;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let config = DetectorConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let detector = LocalDetector::load(&config);
    if let Some(reason) = detector.load_error() {
        log::error!("Failed to preload model at startup: {}", reason);
        return Err(io::Error::other(format!("Model loading failed: {}", reason)));
    }
    let detector: Arc<dyn InferenceGateway> = Arc::new(detector);
    let detector = web::Data::from(detector);
    let max_file_size_mb = config.uploads.max_file_size_mb;

    let bind_address = format!("0.0.0.0:{}", config.server.inference_port);
    log::info!(
        "Starting inference server on {} (model {})",
        bind_address,
        config.backend.model_version
    );

    HttpServer::new(move || {
        App::new()
            .app_data(detector.clone())
            .configure(|cfg| configure(cfg, max_file_size_mb))
    })
    .workers(config.backend.workers)
    .bind(&bind_address)?
    .run()
    .await
}
