use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::models::{JobListItem, StatusCounts};
use crate::jobs::{AttemptsRepo, JobsRepo};

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub jobs: JobsRepo,
    pub attempts: AttemptsRepo,
}

/// Read-only inspection surface.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id/timeline", get(get_timeline))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn internal_err(e: anyhow::Error) -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("internal error: {e}"),
    )
}

pub async fn get_timeline(
    Path(id): Path<Uuid>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    match crate::jobs::timeline::build_timeline(&state.jobs, &state.attempts, id).await {
        Ok(Some(tl)) => (StatusCode::OK, Json(tl)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "job not found".into(),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: format!("internal error: {e}"),
            }),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub items: Vec<JobListItem>,
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, (StatusCode, String)> {
    let items = state
        .jobs
        .list_by_user(q.user_id)
        .await
        .map_err(internal_err)?
        .into_iter()
        .map(JobListItem::from)
        .collect();

    Ok(Json(ListJobsResponse { items }))
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub now_utc: DateTime<Utc>,
    pub jobs: StatusCounts,
}

pub async fn metrics(
    State(state): State<ApiState>,
) -> Result<Json<MetricsResponse>, (StatusCode, String)> {
    let rows = state.jobs.status_counts().await.map_err(internal_err)?;

    Ok(Json(MetricsResponse {
        now_utc: Utc::now(),
        jobs: StatusCounts::from_rows(&rows),
    }))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
