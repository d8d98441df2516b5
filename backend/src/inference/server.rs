use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use log::{error, info, warn};
use serde::Serialize;
use shared::{DetectResponse, HealthResponse, MediaType};

use super::{InferenceError, InferenceGateway};
use crate::uploads::{self, UploadError};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone, Copy)]
struct UploadLimit(u64);

/// Routes of the standalone inference service: the HTTP face of whatever gateway is
/// registered as `web::Data<dyn InferenceGateway>`.
pub fn configure(cfg: &mut web::ServiceConfig, max_file_size_mb: u64) {
    cfg.app_data(web::Data::new(UploadLimit(max_file_size_mb)))
        .service(web::resource("/detect").route(web::post().to(detect)))
        .service(web::resource("/health").route(web::get().to(health)));
}

fn error_response(mut builder: actix_web::HttpResponseBuilder, message: String) -> HttpResponse {
    builder.json(ErrorResponse { error: message })
}

fn internal_error() -> HttpResponse {
    error_response(HttpResponse::InternalServerError(), "Internal server error".to_string())
}

async fn detect(
    gateway: web::Data<dyn InferenceGateway>,
    limit: web::Data<UploadLimit>,
    payload: Multipart,
) -> HttpResponse {
    let form = match uploads::read_form(payload, limit.0).await {
        Ok(form) => form,
        Err(e @ UploadError::FileTooLarge(_)) => {
            return error_response(HttpResponse::PayloadTooLarge(), e.to_string());
        }
        Err(e) => return error_response(HttpResponse::BadRequest(), e.to_string()),
    };

    let raw_type = form.field("media_type").unwrap_or_default().to_string();
    let media_type: MediaType = match raw_type.parse() {
        Ok(media_type) => media_type,
        Err(_) => {
            let err = InferenceError::UnsupportedMediaType(raw_type);
            warn!("Rejecting detect request: {}", err);
            return error_response(HttpResponse::BadRequest(), err.to_string());
        }
    };
    let Some(file) = form.file else {
        return error_response(
            HttpResponse::BadRequest(),
            UploadError::MissingField("file").to_string(),
        );
    };

    let suffix = format!(".{}", uploads::extract_extension(&file.file_name));
    let staged = match tempfile::Builder::new().prefix("detect_").suffix(&suffix).tempfile() {
        Ok(staged) => staged,
        Err(e) => {
            error!("Failed to stage upload: {}", e);
            return internal_error();
        }
    };
    if let Err(e) = tokio::fs::write(staged.path(), &file.data).await {
        error!("Failed to write staged upload {}: {}", staged.path().display(), e);
        return internal_error();
    }

    info!("Running {} detection on {} ({} bytes)", media_type, file.file_name, file.data.len());
    match gateway.detect(staged.path(), media_type).await {
        Ok(output) => HttpResponse::Ok().json(DetectResponse::from(output)),
        Err(e) => {
            error!("Detection failed for {}: {}", file.file_name, e);
            match e {
                InferenceError::BackendUnavailable(_) => error_response(
                    HttpResponse::ServiceUnavailable(),
                    "Inference backend unavailable".to_string(),
                ),
                InferenceError::UnsupportedMediaType(_) | InferenceError::Preprocessing(_) => {
                    error_response(HttpResponse::UnprocessableEntity(), e.to_string())
                }
                InferenceError::InvalidOutput(_) | InferenceError::Model(_) => internal_error(),
            }
        }
    }
}

async fn health(gateway: web::Data<dyn InferenceGateway>) -> HttpResponse {
    let body = HealthResponse {
        status: String::new(),
        backend: gateway.kind().to_string(),
    };
    if gateway.health_check().await {
        HttpResponse::Ok().json(HealthResponse {
            status: "ok".into(),
            ..body
        })
    } else {
        HttpResponse::ServiceUnavailable().json(HealthResponse {
            status: "unavailable".into(),
            ..body
        })
    }
}
