use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use log::{error, info, warn};
use serde::Serialize;
use shared::{DetectionListResponse, DetectionResponse, HealthResponse, MediaType};
use uuid::Uuid;

use crate::orchestrator::{DetectionOrchestrator, ProcessError};
use crate::records::{NewDetection, Pagination, RecordStore, StoreError};
use crate::uploads::{self, UploadPolicy};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(mut builder: actix_web::HttpResponseBuilder, message: impl Into<String>) -> HttpResponse {
    builder.json(ErrorResponse {
        error: message.into(),
    })
}

fn internal_error() -> HttpResponse {
    error_response(HttpResponse::InternalServerError(), "Internal server error")
}

fn parse_id(raw: &str) -> Result<Uuid, HttpResponse> {
    Uuid::parse_str(raw)
        .map_err(|_| error_response(HttpResponse::BadRequest(), "Invalid UUID format"))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/health").route(web::get().to(health)))
        .service(web::resource("/api/detections").route(web::get().to(list_detections)))
        .service(web::resource("/api/detections/upload").route(web::post().to(upload_media)))
        .service(
            web::resource("/api/detections/{id}")
                .route(web::get().to(get_detection))
                .route(web::delete().to(delete_detection)),
        )
        .service(
            web::resource("/api/detections/{id}/process").route(web::post().to(process_detection)),
        );
}

async fn health(orchestrator: web::Data<DetectionOrchestrator>) -> HttpResponse {
    let gateway = orchestrator.gateway();
    let backend = gateway.kind().to_string();
    if gateway.health_check().await {
        HttpResponse::Ok().json(HealthResponse {
            status: "healthy".into(),
            backend,
        })
    } else {
        warn!("Health check: {} inference backend is not ready", backend);
        HttpResponse::ServiceUnavailable().json(HealthResponse {
            status: "unhealthy".into(),
            backend,
        })
    }
}

async fn list_detections(
    store: web::Data<dyn RecordStore>,
    query: web::Query<Pagination>,
) -> HttpResponse {
    let pagination = query.into_inner();
    let (limit, offset) = match pagination.bounds() {
        Ok(bounds) => bounds,
        Err(e) => return error_response(HttpResponse::BadRequest(), e.to_string()),
    };

    let records = match store.list(limit, offset).await {
        Ok(records) => records,
        Err(e) => {
            error!("Failed to list detections: {}", e);
            return internal_error();
        }
    };
    let total = match store.count().await {
        Ok(total) => total,
        Err(e) => {
            error!("Failed to count detections: {}", e);
            return internal_error();
        }
    };

    HttpResponse::Ok().json(DetectionListResponse {
        detections: records.into_iter().map(DetectionResponse::from).collect(),
        total,
        page: pagination.page,
        per_page: pagination.per_page,
    })
}

async fn upload_media(
    store: web::Data<dyn RecordStore>,
    policy: web::Data<UploadPolicy>,
    payload: Multipart,
) -> HttpResponse {
    let form = match uploads::read_form(payload, policy.max_file_size_mb).await {
        Ok(form) => form,
        Err(e) => {
            warn!("Rejected upload: {}", e);
            return error_response(HttpResponse::BadRequest(), e.to_string());
        }
    };

    let media_type: MediaType = match form.field("media_type").map(str::parse::<MediaType>) {
        Some(Ok(media_type)) => media_type,
        Some(Err(_)) => {
            return error_response(
                HttpResponse::BadRequest(),
                "Invalid media type. Must be 'image' or 'video'",
            );
        }
        None => {
            return error_response(
                HttpResponse::BadRequest(),
                uploads::UploadError::MissingField("media_type").to_string(),
            );
        }
    };
    let description = form
        .field("description")
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    let Some(file) = form.file else {
        return error_response(
            HttpResponse::BadRequest(),
            uploads::UploadError::MissingField("file").to_string(),
        );
    };

    let extension = match policy.validate_extension(&file.file_name, media_type) {
        Ok(extension) => extension,
        Err(e) => {
            warn!("Rejected upload {}: {}", file.file_name, e);
            return error_response(HttpResponse::BadRequest(), e.to_string());
        }
    };
    let path = match policy.store(&file.data, &extension).await {
        Ok(path) => path,
        Err(e) => {
            error!("Failed to store upload {}: {}", file.file_name, e);
            return internal_error();
        }
    };

    let new = NewDetection {
        media_path: path.display().to_string(),
        media_type: media_type.to_string(),
        file_name: file.file_name,
        file_size: file.data.len() as u64,
        description,
    };
    match store.create(new).await {
        Ok(record) => {
            info!("Created detection {} for {}", record.id, record.file_name);
            HttpResponse::Created().json(DetectionResponse::from(record))
        }
        Err(e) => {
            error!("Failed to create detection record: {}", e);
            internal_error()
        }
    }
}

async fn get_detection(
    store: web::Data<dyn RecordStore>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = match parse_id(&path.into_inner()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match store.get(id).await {
        Ok(record) => HttpResponse::Ok().json(DetectionResponse::from(record)),
        Err(e @ StoreError::NotFound(_)) => error_response(HttpResponse::NotFound(), e.to_string()),
        Err(e) => {
            error!("Error retrieving detection {}: {}", id, e);
            internal_error()
        }
    }
}

async fn delete_detection(
    store: web::Data<dyn RecordStore>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = match parse_id(&path.into_inner()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match store.delete(id).await {
        Ok(()) => {
            info!("Deleted detection {}", id);
            HttpResponse::NoContent().finish()
        }
        Err(e @ StoreError::NotFound(_)) => error_response(HttpResponse::NotFound(), e.to_string()),
        Err(e) => {
            error!("Error deleting detection {}: {}", id, e);
            internal_error()
        }
    }
}

async fn process_detection(
    orchestrator: web::Data<DetectionOrchestrator>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = match parse_id(&path.into_inner()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match orchestrator.process(id).await {
        Ok(outcome) => HttpResponse::Ok().json(DetectionResponse::from(outcome.into_record())),
        Err(e) => match e {
            ProcessError::NotFound(_) => error_response(HttpResponse::NotFound(), e.to_string()),
            ProcessError::AlreadyProcessing(_) | ProcessError::AlreadyTerminal { .. } => {
                error_response(HttpResponse::Conflict(), e.to_string())
            }
            ProcessError::UnsupportedMediaType(_) => {
                error_response(HttpResponse::BadRequest(), e.to_string())
            }
            ProcessError::Store(_) | ProcessError::Internal(_) => {
                error!("Processing detection {} failed: {}", id, e);
                internal_error()
            }
        },
    }
}
