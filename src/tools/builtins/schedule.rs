//! Tools over the job-store-backed scheduling core (see
//! `crate::scheduler::core`), as distinct from `builtins::cron`'s
//! legacy `cron_jobs.json` system.
//!
//! Tools exposed:
//! - `list_jobs {}` — list every durable job
//! - `schedule_job { id, kind, schedule?, execute_at?, tool?, session_id?, message? }` — upsert a job
//! - `unschedule_job { id }` — remove a job
//! - `run_job_now { id }` — fire a job immediately, out of band from its schedule

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::path::Path;

use crate::scheduler::adapter_ref;
use crate::store::{Job, JobKind, PayloadMap, ToolKind};
use crate::tools::{register_tool, ToolMeta};

fn adapter() -> anyhow::Result<&'static crate::scheduler::Adapter> {
    adapter_ref().ok_or_else(|| anyhow::anyhow!("scheduling core is not running"))
}

fn job_json(job: &Job) -> Value {
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

/// `list_jobs` — enumerate every job in the durable store.
pub async fn list_jobs(_workspace: &Path, _args: Value) -> anyhow::Result<Value> {
    let jobs = adapter()?.list_jobs().await?;
    let jobs: Vec<Value> = jobs.iter().map(job_json).collect();
    Ok(json!({ "jobs": jobs }))
}

/// `schedule_job` — create or replace a job by id.
pub async fn schedule_job(_workspace: &Path, args: Value) -> anyhow::Result<Value> {
    let id = args["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("schedule_job requires an 'id' string"))?
        .to_string();

    let kind = match args["kind"].as_str() {
        Some("recurring") | None => JobKind::Recurring,
        Some("oneshot") => JobKind::OneShot,
        Some(other) => anyhow::bail!("schedule_job: unknown kind {other:?}, expected 'recurring' or 'oneshot'"),
    };

    let schedule = args["schedule"].as_str().unwrap_or("").to_string();

    let execute_at = match args.get("execute_at").and_then(Value::as_str) {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(s)
                .map_err(|e| anyhow::anyhow!("schedule_job: invalid execute_at: {e}"))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let tool = match args.get("tool").and_then(Value::as_str) {
        Some("send_message") => ToolKind::SendMessage,
        Some("agent") => ToolKind::Agent,
        Some("") | None => ToolKind::None,
        Some(other) => anyhow::bail!("schedule_job: unknown tool {other:?}"),
    };

    let session_id = args.get("session_id").and_then(Value::as_str).unwrap_or("").to_string();

    let mut payload = PayloadMap::new();
    if let Some(message) = args.get("message").and_then(Value::as_str) {
        payload.insert("message", json!(message));
    }

    let user_id = args.get("user_id").and_then(Value::as_str).unwrap_or("").to_string();

    let job = Job {
        id: id.clone(),
        kind,
        schedule,
        execute_at,
        user_id,
        tool,
        payload,
        session_id,
        metadata: Default::default(),
        executed: false,
        executed_at: None,
        created_at: Utc::now(),
        run_count: 0,
    };

    adapter()?.add_job(job).await?;

    Ok(json!({ "status": "scheduled", "id": id }))
}

/// `unschedule_job` — remove a job by id.
pub async fn unschedule_job(_workspace: &Path, args: Value) -> anyhow::Result<Value> {
    let id = args["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("unschedule_job requires an 'id' string"))?;

    adapter()?.remove_job(id).await?;
    Ok(json!({ "status": "removed", "id": id }))
}

/// `run_job_now` — fire a job immediately regardless of its schedule, by
/// re-adding it with `execute_at` set to now so it fires on the next
/// `add_job` call's immediate-fire path, then restoring its original
/// schedule. Recurring jobs are fired by reinserting them as a past-due
/// one-shot copy so the source recurring entry is left untouched.
pub async fn run_job_now(_workspace: &Path, args: Value) -> anyhow::Result<Value> {
    let id = args["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("run_job_now requires an 'id' string"))?;

    let a = adapter()?;
    let jobs = a.list_jobs().await?;
    let job = jobs
        .into_iter()
        .find(|j| j.id == id)
        .ok_or_else(|| anyhow::anyhow!("no job with id {id}"))?;

    match job.kind {
        JobKind::OneShot => {
            let mut trigger = job.clone();
            trigger.executed = false;
            trigger.execute_at = Some(Utc::now());
            a.add_job(trigger).await?;
        }
        JobKind::Recurring => {
            let trigger = Job {
                id: format!("{id}-manual-{}", Utc::now().timestamp_millis()),
                kind: JobKind::OneShot,
                schedule: String::new(),
                execute_at: Some(Utc::now()),
                user_id: job.user_id.clone(),
                tool: job.tool,
                payload: job.payload.clone(),
                session_id: job.session_id.clone(),
                metadata: job.metadata.clone(),
                executed: false,
                executed_at: None,
                created_at: Utc::now(),
                run_count: 0,
            };
            a.add_job(trigger.clone()).await?;
            a.remove_job(&trigger.id).await?;
        }
    }

    Ok(json!({ "status": "triggered", "id": id }))
}

/// Register job-store scheduling tools.
pub fn register() {
    register_tool(ToolMeta {
        name: "list_jobs".into(),
        description: "List every job in the durable scheduling store, recurring and one-shot alike.".into(),
        args_schema: json!({ "type": "object", "properties": {} }),
    });

    register_tool(ToolMeta {
        name: "schedule_job".into(),
        description: "Create or replace a scheduled job by id. Recurring jobs need a calendar 'schedule' \
            expression; one-shot jobs need an RFC3339 'execute_at' instead. Set 'tool' to 'send_message' \
            or 'agent' with a 'session_id' (\"<channel>:<chat>\") and 'message' to dispatch on fire.".into(),
        args_schema: json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Stable job id; re-using one replaces that job" },
                "kind": { "type": "string", "enum": ["recurring", "oneshot"], "description": "Defaults to 'recurring'" },
                "schedule": { "type": "string", "description": "Calendar expression for recurring jobs (6-field cron or @hourly/@daily/@weekly/@monthly/@yearly)" },
                "execute_at": { "type": "string", "description": "RFC3339 timestamp for one-shot jobs" },
                "tool": { "type": "string", "enum": ["send_message", "agent"], "description": "Downstream consumer to route the firing to" },
                "session_id": { "type": "string", "description": "\"<channel>:<chat>\" destination, required when 'tool' is set" },
                "message": { "type": "string", "description": "Message payload dispatched on fire, required when 'tool' is set" },
                "user_id": { "type": "string", "description": "Owning user id, for bookkeeping" }
            },
            "required": ["id"]
        }),
    });

    register_tool(ToolMeta {
        name: "unschedule_job".into(),
        description: "Remove a job from the scheduling store by id.".into(),
        args_schema: json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        }),
    });

    register_tool(ToolMeta {
        name: "run_job_now".into(),
        description: "Fire a scheduled job immediately, out of band from its schedule.".into(),
        args_schema: json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        }),
    });
}
