//! `cronctl cron add|rm|ls|run` — administer the durable job store
//! straight from the CLI, without a running daemon.
//!
//! Mirrors the `cli::scaffold_agent`/`cli::show_agent` shape used
//! elsewhere in this crate: a thin async function per subcommand,
//! taking the parsed config path directly rather than going through
//! the gateway or a live scheduler.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use cronctl::config::Config;
use cronctl::store::{Job, JobKind, JobStore, PayloadMap, ToolKind};

use crate::CronAction;

fn workspace_for(cfg: &Config) -> PathBuf {
    cfg.cron_core
        .as_ref()
        .and_then(|c| c.workspace.as_ref())
        .map(PathBuf::from)
        .unwrap_or_else(cronctl::cronctl_home)
}

pub async fn run(config_path: &std::path::Path, action: CronAction) -> anyhow::Result<()> {
    let cfg = Config::load(config_path).await?;
    let store = JobStore::at_workspace(workspace_for(&cfg));

    match action {
        CronAction::Add {
            id,
            schedule,
            execute_at,
            tool,
            session_id,
            message,
        } => add(&store, id, schedule, execute_at, tool, session_id, message).await,
        CronAction::Rm { id } => rm(&store, &id).await,
        CronAction::Ls => ls(&store).await,
        CronAction::Run { id } => run_now(&store, &id).await,
    }
}

async fn add(
    store: &JobStore,
    id: String,
    schedule: Option<String>,
    execute_at: Option<String>,
    tool: Option<String>,
    session_id: Option<String>,
    message: Option<String>,
) -> anyhow::Result<()> {
    let (kind, schedule, execute_at) = match (schedule, execute_at) {
        (Some(s), None) => (JobKind::Recurring, s, None),
        (None, Some(ts)) => {
            let at = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| anyhow::anyhow!("invalid --execute-at: {e}"))?
                .with_timezone(&Utc);
            (JobKind::OneShot, String::new(), Some(at))
        }
        (Some(_), Some(_)) => {
            anyhow::bail!("pass exactly one of --schedule (recurring) or --execute-at (one-shot)")
        }
        (None, None) => anyhow::bail!("one of --schedule or --execute-at is required"),
    };

    let tool = match tool.as_deref() {
        Some("send_message") => ToolKind::SendMessage,
        Some("agent") => ToolKind::Agent,
        Some(other) => anyhow::bail!("unknown --tool {other:?}, expected 'send_message' or 'agent'"),
        None => ToolKind::None,
    };

    let mut payload = PayloadMap::new();
    if let Some(message) = message {
        payload.insert("message", serde_json::json!(message));
    }

    let job = Job {
        id: id.clone(),
        kind,
        schedule,
        execute_at,
        user_id: String::new(),
        tool,
        payload,
        session_id: session_id.unwrap_or_default(),
        metadata: Default::default(),
        executed: false,
        executed_at: None,
        created_at: Utc::now(),
        run_count: 0,
    };
    job.validate()?;

    store.upsert_job(job).await?;
    println!("job '{id}' saved. Takes effect on next daemon start, or immediately if already running.");
    Ok(())
}

async fn rm(store: &JobStore, id: &str) -> anyhow::Result<()> {
    store.remove(id).await?;
    println!("job '{id}' removed from storage.");
    Ok(())
}

async fn ls(store: &JobStore) -> anyhow::Result<()> {
    let jobs = store.load().await?;
    if jobs.is_empty() {
        println!("no jobs in store.");
        return Ok(());
    }
    for job in jobs {
        let kind = match job.kind {
            JobKind::Recurring => "recurring",
            JobKind::OneShot => "oneshot",
        };
        println!(
            "{:<24} {:<10} schedule={:<20} execute_at={:<28} tool={:<12} executed={} run_count={}",
            job.id,
            kind,
            job.schedule,
            job.execute_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            job.tool.as_str(),
            job.executed,
            job.run_count,
        );
    }
    Ok(())
}

async fn run_now(store: &JobStore, id: &str) -> anyhow::Result<()> {
    let jobs = store.load().await?;
    let mut job = jobs
        .into_iter()
        .find(|j| j.id == id)
        .ok_or_else(|| anyhow::anyhow!("no job with id {id}"))?;

    if job.kind != JobKind::OneShot {
        anyhow::bail!(
            "'{id}' is a recurring job — only one-shots can be marked due from the CLI; \
             use the run_job_now tool against a running daemon instead"
        );
    }

    job.executed = false;
    job.execute_at = Some(Utc::now());
    store.upsert_job(job).await?;
    println!("job '{id}' marked due now. Fires on the daemon's next one-shot sweep (up to 60s).");
    Ok(())
}
