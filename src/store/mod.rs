//! Job Store — durable mapping `id -> Job`.
//!
//! Jobs are persisted one-per-line as JSON objects (`<workspace>/cron/
//! jobs.jsonl` by default). `save` is the only operation that can
//! shrink the file; it writes to a `.tmp` sibling and renames it into
//! place so a crash mid-write never leaves a truncated store — the
//! same atomic-replace idiom `scheduler::SchedulerHandle::register_job`
//! uses for `cron_jobs.json`, generalized here to a line-delimited
//! format per job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

/// Recurring fires repeatedly on a calendar expression; one-shot fires
/// at most once at `execute_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Recurring,
    #[serde(rename = "oneshot")]
    OneShot,
}

impl Default for JobKind {
    /// Empty `type` is treated as `Recurring` for backward compatibility
    /// with stores written before the `type` field existed.
    fn default() -> Self {
        JobKind::Recurring
    }
}

/// Selects which downstream consumer a firing is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    #[serde(rename = "")]
    None,
    SendMessage,
    Agent,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::None => "",
            ToolKind::SendMessage => "send_message",
            ToolKind::Agent => "agent",
        }
    }
}

/// Tool-specific payload parameters.
///
/// Kept as a raw `serde_json::Map` so unknown keys round-trip
/// untouched (per the "dynamic payload map" design note: represent
/// the open mapping as JSON, with a typed accessor for the one
/// well-known key the dispatch path cares about).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadMap(pub serde_json::Map<String, serde_json::Value>);

impl PayloadMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The dispatch-path's one well-known key.
    pub fn message(&self) -> Option<&str> {
        self.0.get("message").and_then(|v| v.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }
}

/// A scheduled unit of future work.
///
/// `validate` enforces the field invariants (schedule/execute_at
/// pairing, non-empty id, well-formed session_id) at
/// `Scheduler::add_job` time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: JobKind,
    #[serde(default)]
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub tool: ToolKind,
    #[serde(default)]
    pub payload: PayloadMap,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    /// Set once at construction time. In-memory bookkeeping only — not
    /// part of the persisted record or the validated invariant set,
    /// never consulted by dispatch.
    #[serde(default = "Utc::now", skip_serializing)]
    pub created_at: DateTime<Utc>,
    /// Incremented by the Scheduler each time a firing is submitted.
    /// In-memory bookkeeping only, not persisted: a lightweight per-job
    /// run counter without a full run log on disk.
    #[serde(default, skip_serializing)]
    pub run_count: u64,
}

impl Job {
    /// Enforce the field invariants. Called by the Scheduler before any
    /// state change so a rejected job never partially lands.
    pub fn validate(&self) -> CoreResult<()> {
        match self.kind {
            JobKind::OneShot => {
                if !self.schedule.is_empty() {
                    return Err(CoreError::validation(
                        "one-shot jobs must not set a schedule",
                    ));
                }
                if self.execute_at.is_none() {
                    return Err(CoreError::validation(
                        "one-shot jobs require execute_at",
                    ));
                }
            }
            JobKind::Recurring => {
                if self.schedule.trim().is_empty() {
                    return Err(CoreError::validation(
                        "recurring jobs require a non-empty schedule",
                    ));
                }
                crate::scheduler::calendar::parse(&self.schedule)
                    .map_err(|e| CoreError::validation(format!("invalid schedule: {e}")))?;
                if self.execute_at.is_some() {
                    return Err(CoreError::validation(
                        "recurring jobs must not set execute_at",
                    ));
                }
            }
        }

        if matches!(self.tool, ToolKind::SendMessage | ToolKind::Agent) {
            let message = self.payload.message().unwrap_or("");
            if message.is_empty() {
                return Err(CoreError::validation(format!(
                    "tool '{}' requires a non-empty payload.message",
                    self.tool.as_str()
                )));
            }
            validate_session_id(&self.session_id)?;
        }

        Ok(())
    }

    /// Normalize a one-shot job's `schedule` to the empty string, so
    /// stored one-shots never carry a stray calendar expression.
    pub fn normalize(mut self) -> Self {
        if self.kind == JobKind::OneShot {
            self.schedule.clear();
        }
        self
    }
}

/// Validate the `<channel>:<chat>` session-id form: exactly one colon,
/// non-empty on both sides.
pub fn validate_session_id(session_id: &str) -> CoreResult<()> {
    match session_id.split_once(':') {
        Some((left, right)) if !left.is_empty() && !right.is_empty() && !right.contains(':') => {
            Ok(())
        }
        _ => Err(CoreError::validation(format!(
            "session_id must be of the form '<channel>:<chat>', got {session_id:?}"
        ))),
    }
}

/// Durable mapping `id -> Job`, backed by a line-delimited JSON file
/// with atomic whole-file replace.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `<workspace>/cron/jobs.jsonl`.
    pub fn at_workspace(workspace: impl AsRef<Path>) -> Self {
        Self::new(workspace.as_ref().join("cron").join("jobs.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every job currently in the store. Returns an empty vec if
    /// the backing file does not exist. Malformed lines are logged and
    /// skipped; the rest of the file still loads.
    pub async fn load(&self) -> CoreResult<Vec<Job>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::Storage(e)),
        };

        let mut jobs = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Job>(line) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "job store: skipping malformed record"
                    );
                }
            }
        }
        Ok(jobs)
    }

    /// Append a single record. Creates the parent directory if needed.
    /// Fast path for first-write; not used for replaces (use `upsert_job`).
    pub async fn append(&self, job: &Job) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(job)
            .map_err(|e| CoreError::dispatch(format!("serialize job: {e}")))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Atomically replace the store with `jobs`: write to `<path>.tmp`,
    /// flush, rename over the final path. The only operation that can
    /// shrink the store.
    pub async fn save(&self, jobs: &[Job]) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut buf = String::new();
        for job in jobs {
            let line = serde_json::to_string(job)
                .map_err(|e| CoreError::dispatch(format!("serialize job: {e}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        let tmp_path = tmp_path_for(&self.path);
        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        tmp.write_all(buf.as_bytes()).await?;
        tmp.flush().await?;
        drop(tmp);

        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Load, find the existing record by `id` and replace it in place
    /// (preserving order) or append, normalize (`oneshot` ⇒
    /// `schedule=""`), then save.
    pub async fn upsert_job(&self, job: Job) -> CoreResult<()> {
        let job = job.normalize();
        let mut jobs = self.load().await?;
        match jobs.iter().position(|j| j.id == job.id) {
            Some(idx) => jobs[idx] = job,
            None => jobs.push(job),
        }
        self.save(&jobs).await
    }

    /// Remove `id` from the store. Logs (does not error) if `id` was
    /// absent.
    pub async fn remove(&self, id: &str) -> CoreResult<()> {
        let mut jobs = self.load().await?;
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            warn!(job_id = %id, "job store: remove() called for unknown id");
        }
        self.save(&jobs).await
    }

    /// Drop every record where `type=oneshot AND executed=true`.
    pub async fn remove_executed_oneshots(&self) -> CoreResult<usize> {
        let mut jobs = self.load().await?;
        let before = jobs.len();
        jobs.retain(|j| !(j.kind == JobKind::OneShot && j.executed));
        let removed = before - jobs.len();
        if removed > 0 {
            self.save(&jobs).await?;
            debug!(removed, "job store: purged executed one-shots");
        }
        Ok(removed)
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
