//! HTTP surface for triggering syncs and reading pipeline status.

use actix_web::{
    HttpResponse, Responder, ResponseError, get,
    http::{StatusCode, header::ContentType},
    post,
    web::{Data, Json, Path},
};
use serde::{Deserialize, Serialize};
use snowsync::destination::bigquery::BigQueryDestination;
use snowsync::engine::MemorySwapIntentStore;
use snowsync::error::{ErrorKind, SyncError};
use snowsync::runner::PipelineRunner;
use snowsync::source::SnowflakeConnector;
use snowsync::status::{PipelineStatus, StatusReporter};
use snowsync::types::{SyncRun, SyncStatus, ValidationReport};
use thiserror::Error;

use crate::notification::WebhookNotificationClient;

/// Runner type used by the service.
pub type ServiceRunner =
    PipelineRunner<SnowflakeConnector, BigQueryDestination, MemorySwapIntentStore>;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub runner: ServiceRunner,
    pub reporter: StatusReporter,
    pub notifier: Option<WebhookNotificationClient>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no pipeline named `{0}` is configured")]
    UnknownPipeline(String),

    #[error("pipeline `{0}` is already running")]
    AlreadyRunning(String),

    #[error("request must select `pipeline` or `pipelines`")]
    MissingPipelineSelector,

    #[error("internal server error")]
    Internal(#[source] SyncError),
}

impl ApiError {
    fn from_sync(pipeline: &str, err: SyncError) -> Self {
        match err.kind() {
            ErrorKind::UnknownPipeline => ApiError::UnknownPipeline(pipeline.to_string()),
            ErrorKind::AlreadyRunning => ApiError::AlreadyRunning(pipeline.to_string()),
            _ => ApiError::Internal(err),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub error: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::UnknownPipeline(_) => StatusCode::NOT_FOUND,
            ApiError::AlreadyRunning(_) => StatusCode::CONFLICT,
            ApiError::MissingPipelineSelector => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error_message = ErrorMessage {
            error: self.to_string(),
        };
        let body =
            serde_json::to_string(&error_message).expect("failed to serialize error message");
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(body)
    }
}

/// Body of `POST /v1/sync`.
///
/// Selects either one pipeline or several; `pipelines` with `parallel` runs
/// the set concurrently, bounded by the source connection pool.
#[derive(Debug, Deserialize)]
pub struct SyncTriggerRequest {
    #[serde(default)]
    pub pipeline: Option<String>,
    #[serde(default)]
    pub pipelines: Option<Vec<String>>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub pipeline: String,
    pub status: SyncStatus,
    pub rows_processed: u64,
    pub duration_seconds: f64,
    pub dry_run: bool,
    pub validation: Option<ValidationReport>,
    pub error_detail: Option<String>,
}

impl From<&SyncRun> for RunResponse {
    fn from(run: &SyncRun) -> Self {
        Self {
            pipeline: run.pipeline_name.clone(),
            status: run.status,
            rows_processed: run.rows_processed,
            duration_seconds: run.duration_seconds(),
            dry_run: run.dry_run,
            validation: run.validation,
            error_detail: run.error_detail.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchRunEntry {
    pub pipeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchRunResponse {
    pub results: Vec<BatchRunEntry>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusOverviewResponse {
    pub pipelines: Vec<PipelineStatus>,
}

#[get("/health")]
pub async fn health_check() -> impl Responder {
    Json(HealthResponse { status: "ok" })
}

#[post("/v1/sync")]
pub async fn trigger_sync(
    state: Data<AppState>,
    request: Json<SyncTriggerRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();

    if let Some(pipeline) = request.pipeline {
        let run = state
            .runner
            .run(&pipeline, request.dry_run)
            .await
            .map_err(|err| ApiError::from_sync(&pipeline, err))?;

        notify(&state, &run).await;

        // Schedulers alert on non-2xx, so the run outcome decides the code.
        return Ok(run_status_response(&run).json(RunResponse::from(&run)));
    }

    let Some(pipelines) = request.pipelines else {
        return Err(ApiError::MissingPipelineSelector);
    };
    if pipelines.is_empty() {
        return Err(ApiError::MissingPipelineSelector);
    }

    let results = state
        .runner
        .run_batch(&pipelines, request.parallel, request.dry_run)
        .await;

    let mut entries = Vec::with_capacity(results.len());
    let mut all_succeeded = true;
    for (pipeline, result) in results {
        match result {
            Ok(run) => {
                notify(&state, &run).await;
                all_succeeded &= run.status == SyncStatus::Success;
                entries.push(BatchRunEntry {
                    pipeline,
                    run: Some(RunResponse::from(&run)),
                    error: None,
                });
            }
            Err(err) => {
                all_succeeded = false;
                entries.push(BatchRunEntry {
                    pipeline,
                    run: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    let mut response = if all_succeeded {
        HttpResponse::Ok()
    } else {
        HttpResponse::InternalServerError()
    };

    Ok(response.json(BatchRunResponse { results: entries }))
}

/// Picks the response status for a finished run.
fn run_status_response(run: &SyncRun) -> actix_web::HttpResponseBuilder {
    match run.status {
        SyncStatus::Success => HttpResponse::Ok(),
        _ => HttpResponse::InternalServerError(),
    }
}

#[get("/v1/status")]
pub async fn read_all_statuses(state: Data<AppState>) -> impl Responder {
    Json(StatusOverviewResponse {
        pipelines: state.reporter.overview(),
    })
}

#[get("/v1/status/{pipeline}")]
pub async fn read_pipeline_status(
    state: Data<AppState>,
    pipeline: Path<String>,
) -> Result<HttpResponse, ApiError> {
    let pipeline = pipeline.into_inner();
    let status = state
        .reporter
        .pipeline(&pipeline)
        .map_err(|err| ApiError::from_sync(&pipeline, err))?;

    Ok(HttpResponse::Ok().json(status))
}

async fn notify(state: &AppState, run: &SyncRun) {
    if let Some(notifier) = &state.notifier {
        notifier.notify_if_failed(run).await;
    }
}
