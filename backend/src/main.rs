use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use detector_backend::config::DetectorConfig;
use detector_backend::inference::{InferenceGateway, build_gateway};
use detector_backend::orchestrator::DetectionOrchestrator;
use detector_backend::records::{RecordStore, build_store};
use detector_backend::routes::configure_routes;
use detector_backend::uploads::UploadPolicy;
use std::env;
use std::io;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = DetectorConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let gateway: Arc<dyn InferenceGateway> = build_gateway(&config).map_err(|e| {
        log::error!("Failed to set up {:?} inference backend: {}", config.backend.mode, e);
        io::Error::other(format!("Inference backend setup failed: {}", e))
    })?;
    if gateway.health_check().await {
        log::info!("Inference backend ({}) is ready", gateway.kind());
    } else {
        log::warn!(
            "Inference backend ({}) is not answering yet; detections will fail until it is",
            gateway.kind()
        );
    }

    let store: Arc<dyn RecordStore> = build_store(&config).await;
    let orchestrator = web::Data::new(
        DetectionOrchestrator::new(store.clone(), gateway).with_deadline(config.deadline()),
    );
    let store = web::Data::from(store);
    let policy = web::Data::new(UploadPolicy::from_config(&config));

    let bind_address = format!("0.0.0.0:{}", config.server.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(orchestrator.clone())
            .app_data(store.clone())
            .app_data(policy.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
