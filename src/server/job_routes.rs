//! Job HTTP routes.
//!
//! - POST /submit - Upload an image (multipart/form-data, field `file`)
//! - GET /status/{id} - Current status of a job
//! - GET /result/{id} - Description of a completed job

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::DateTime;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::jobs::{JobServiceError, JobStatus};
use crate::server::state::{GuardedJobService, ServerState};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct JobResultResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub image_description: String,
    pub generated_by: String,
    pub created_at: String,
    pub completed_at: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
        }),
    )
        .into_response()
}

/// Bodies cut off by the route's body limit get the same detail as
/// oversized files caught by admission.
fn multipart_error_response(e: MultipartError, fallback: impl Into<String>) -> Response {
    match e.status() {
        StatusCode::PAYLOAD_TOO_LARGE => {
            error_response(StatusCode::PAYLOAD_TOO_LARGE, "File too large")
        }
        status => error_response(status, fallback),
    }
}

fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

impl IntoResponse for JobServiceError {
    fn into_response(self) -> Response {
        match self {
            JobServiceError::Admission(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
            JobServiceError::NotFound => error_response(StatusCode::NOT_FOUND, "Job not found"),
            JobServiceError::NotReady(_) => {
                error_response(StatusCode::BAD_REQUEST, "Job not completed")
            }
            other => {
                error!("Job request failed: {}", other);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

/// POST /submit
async fn submit_job(
    State(service): State<GuardedJobService>,
    mut multipart: Multipart,
) -> Response {
    let mut upload: Option<(String, String, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read multipart body: {}", e);
                let detail = e.body_text();
                return multipart_error_response(e, detail);
            }
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("").to_string();
        let content_type = field.content_type().unwrap_or("").to_string();
        match field.bytes().await {
            Ok(bytes) => upload = Some((filename, content_type, bytes.to_vec())),
            Err(e) => {
                warn!("Failed to read file data: {}", e);
                return multipart_error_response(e, "Failed to read file");
            }
        }
    }

    let Some((filename, content_type, data)) = upload else {
        return error_response(StatusCode::BAD_REQUEST, "No file provided");
    };
    debug!(
        "Upload {:?} ({}, {} bytes)",
        filename,
        content_type,
        data.len()
    );

    match service.submit(&data, &content_type, &filename).await {
        Ok(receipt) => Json(SubmitResponse {
            job_id: receipt.job_id,
            status: receipt.status,
            message: "Job submitted successfully".to_string(),
        })
        .into_response(),
        Err(e) => {
            if let JobServiceError::Admission(reason) = &e {
                debug!("Rejected upload {:?}: {}", filename, reason);
            }
            e.into_response()
        }
    }
}

/// GET /status/{id}
async fn get_job_status(
    State(service): State<GuardedJobService>,
    Path(job_id): Path<String>,
) -> Response {
    match service.status(&job_id) {
        Ok(view) => Json(JobStatusResponse {
            job_id: view.job_id,
            status: view.status,
            created_at: format_timestamp(view.created_at),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /result/{id}
async fn get_job_result(
    State(service): State<GuardedJobService>,
    Path(job_id): Path<String>,
) -> Response {
    match service.result(&job_id) {
        Ok(view) => Json(JobResultResponse {
            job_id: view.job_id,
            status: view.status,
            image_description: view.payload,
            generated_by: view.produced_by,
            created_at: format_timestamp(view.created_at),
            completed_at: format_timestamp(view.completed_at),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Build the job routes.
///
/// The upload route's body limit leaves room for multipart framing; the
/// file size itself is enforced by admission.
pub fn job_routes(max_upload_bytes: u64) -> Router<ServerState> {
    let body_limit = max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES);
    let submit_route = Router::new()
        .route("/submit", post(submit_job))
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ));

    Router::new()
        .merge(submit_route)
        .route("/status/{id}", get(get_job_status))
        .route("/result/{id}", get(get_job_result))
}
