//! HTTP handlers over the job-store-backed scheduling core, analogous
//! to `gateway::handlers::cron` but against `scheduler::Adapter`/`Job`
//! instead of the legacy `PersistedCronJob` system. Mounted by
//! `gateway::start_gateway_with_config` at `/api/scheduler/jobs`.

use axum::{extract::Path, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::scheduler::adapter_ref;
use crate::store::{Job, JobKind, PayloadMap, ToolKind};

fn job_to_json(job: &Job) -> serde_json::Value {
    json!({
        "id": job.id,
        "kind": match job.kind { JobKind::Recurring => "recurring", JobKind::OneShot => "oneshot" },
        "schedule": job.schedule,
        "execute_at": job.execute_at,
        "user_id": job.user_id,
        "tool": job.tool.as_str(),
        "session_id": job.session_id,
        "message": job.payload.message(),
        "executed": job.executed,
        "executed_at": job.executed_at,
        "run_count": job.run_count,
    })
}

fn unavailable() -> impl IntoResponse {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "scheduling core is not running" })),
    )
}

/// `GET /api/scheduler/jobs` — list every durable job.
pub(crate) async fn api_scheduler_jobs_list() -> impl IntoResponse {
    let Some(adapter) = adapter_ref() else {
        return unavailable().into_response();
    };
    match adapter.list_jobs().await {
        Ok(jobs) => {
            let jobs: Vec<_> = jobs.iter().map(job_to_json).collect();
            (StatusCode::OK, Json(json!({ "jobs": jobs }))).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(serde::Deserialize)]
pub(crate) struct CreateJobRequest {
    id: String,
    #[serde(default)]
    schedule: Option<String>,
    #[serde(default)]
    execute_at: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// `POST /api/scheduler/jobs` — create or replace a job by id.
pub(crate) async fn api_scheduler_jobs_create(Json(body): Json<CreateJobRequest>) -> impl IntoResponse {
    let Some(adapter) = adapter_ref() else {
        return unavailable().into_response();
    };

    let (kind, schedule, execute_at) = match (body.schedule, body.execute_at) {
        (Some(s), None) => (JobKind::Recurring, s, None),
        (None, Some(ts)) => match DateTime::parse_from_rfc3339(&ts) {
            Ok(at) => (JobKind::OneShot, String::new(), Some(at.with_timezone(&Utc))),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("invalid execute_at: {e}") })),
                )
                    .into_response()
            }
        },
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "pass exactly one of 'schedule' or 'execute_at'" })),
            )
                .into_response()
        }
    };

    let tool = match body.tool.as_deref() {
        Some("send_message") => ToolKind::SendMessage,
        Some("agent") => ToolKind::Agent,
        None | Some("") => ToolKind::None,
        Some(other) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("unknown tool {other:?}") })),
            )
                .into_response()
        }
    };

    let mut payload = PayloadMap::new();
    if let Some(message) = body.message {
        payload.insert("message", json!(message));
    }

    let job = Job {
        id: body.id.clone(),
        kind,
        schedule,
        execute_at,
        user_id: body.user_id.unwrap_or_default(),
        tool,
        payload,
        session_id: body.session_id.unwrap_or_default(),
        metadata: Default::default(),
        executed: false,
        executed_at: None,
        created_at: Utc::now(),
        run_count: 0,
    };

    match adapter.add_job(job).await {
        Ok(()) => (StatusCode::CREATED, Json(json!({ "id": body.id }))).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// `DELETE /api/scheduler/jobs/:id` — remove a job.
pub(crate) async fn api_scheduler_jobs_delete(Path(id): Path<String>) -> impl IntoResponse {
    let Some(adapter) = adapter_ref() else {
        return unavailable().into_response();
    };
    match adapter.remove_job(&id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "deleted": true, "id": id }))).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
