//! The job-store-backed scheduling engine: a calendar-driven recurring
//! loop, a one-shot sweep, and a cleanup sweep, all submitting firings
//! to a [`WorkerPool`].
//!
//! Follows the same ticker idiom already used in this crate
//! (`tokio::time::interval` loops in `super::legacy::run_heartbeat` /
//! `super::legacy::spawn_janitor`), generalized from "one closure per
//! `tokio_cron_scheduler::Job`" to a single registry the Scheduler
//! itself evaluates every tick — so the calendar grammar and the job
//! set both live behind one lock instead of being implicitly encoded as
//! closures captured at registration time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::pool::{Task, WorkerPool};
use crate::scheduler::calendar;
use crate::store::{Job, JobKind, JobStore};

const RECURRING_TICK: Duration = Duration::from_secs(1);
const ONESHOT_SWEEP_TICK: Duration = Duration::from_secs(60);
const CLEANUP_SWEEP_TICK: Duration = Duration::from_secs(24 * 3600);

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the live job registry and drives it forward in time.
///
/// `next_fire` and `schedules` are kept out of the [`Job`] struct
/// itself (and out of the store) because they're purely in-memory
/// scheduling state recomputed from `schedule` on every `Start` —
/// persisting them would just be a second source of truth to keep in
/// sync with the calendar expression.
pub struct Scheduler {
    store: JobStore,
    pool: Arc<WorkerPool>,
    registry: RwLock<HashMap<String, Job>>,
    schedules: Mutex<HashMap<String, Schedule>>,
    next_fire: Mutex<HashMap<String, DateTime<Utc>>>,
    running: RwLock<Option<Running>>,
}

impl Scheduler {
    pub fn new(store: JobStore, pool: Arc<WorkerPool>) -> Self {
        Self {
            store,
            pool,
            registry: RwLock::new(HashMap::new()),
            schedules: Mutex::new(HashMap::new()),
            next_fire: Mutex::new(HashMap::new()),
            running: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Load the job store into the registry and spawn the three
    /// background sweeps. Errors if already started.
    pub async fn start(self: &Arc<Self>) -> CoreResult<()> {
        {
            let guard = self.running.read().await;
            if guard.is_some() {
                return Err(CoreError::state("scheduler already started"));
            }
        }

        let jobs = self.store.load().await?;
        {
            let mut registry = self.registry.write().await;
            let mut schedules = self.schedules.lock().await;
            for job in jobs {
                if job.kind == JobKind::Recurring {
                    match calendar::parse(&job.schedule) {
                        Ok(schedule) => {
                            schedules.insert(job.id.clone(), schedule);
                        }
                        Err(e) => {
                            warn!(job_id = %job.id, error = %e, "scheduler: dropping job with unparsable schedule on load");
                            continue;
                        }
                    }
                }
                registry.insert(job.id.clone(), job);
            }
        }

        let cancel = CancellationToken::new();
        let recurring = tokio::spawn(recurring_loop(self.clone(), cancel.clone()));
        let oneshot = tokio::spawn(oneshot_sweep_loop(self.clone(), cancel.clone()));
        let cleanup = tokio::spawn(cleanup_sweep_loop(self.clone(), cancel.clone()));

        *self.running.write().await = Some(Running {
            cancel,
            tasks: vec![recurring, oneshot, cleanup],
        });
        info!("scheduler: started");
        Ok(())
    }

    /// Cancel all sweeps and wait for them to exit.
    pub async fn stop(&self) -> CoreResult<()> {
        let running = self.running.write().await.take();
        let Some(running) = running else {
            return Err(CoreError::state("scheduler is not started"));
        };
        running.cancel.cancel();
        for task in running.tasks {
            let _ = task.await;
        }
        info!("scheduler: stopped");
        Ok(())
    }

    /// Validate, persist, and register a job. Replaces any existing job
    /// with the same id (P1). A past-due one-shot fires immediately and
    /// is marked executed before this call returns, rather than waiting
    /// for the next sweep.
    pub async fn add_job(&self, job: Job) -> CoreResult<()> {
        job.validate()?;
        let mut job = job.normalize();

        let schedule = if job.kind == JobKind::Recurring {
            Some(
                calendar::parse(&job.schedule)
                    .map_err(CoreError::validation)?,
            )
        } else {
            None
        };

        // Storage is the durability boundary: if this fails we return
        // the error without mutating in-memory state, so the registry
        // never claims a job the store doesn't have (degraded
        // durability would instead register it anyway and log — this
        // crate chooses the stricter behavior; see DESIGN.md).
        self.store.upsert_job(job.clone()).await?;

        if let Some(schedule) = schedule {
            self.schedules.lock().await.insert(job.id.clone(), schedule);
        } else {
            self.schedules.lock().await.remove(&job.id);
        }
        self.next_fire.lock().await.remove(&job.id);

        let fire_immediately = job.kind == JobKind::OneShot
            && !job.executed
            && job.execute_at.map(|t| t <= Utc::now()).unwrap_or(false);

        if fire_immediately {
            self.fire(&job).await;
            job.executed = true;
            job.executed_at = Some(Utc::now());
            job.run_count += 1;
            self.store.upsert_job(job.clone()).await?;
        }

        self.registry.write().await.insert(job.id.clone(), job);
        Ok(())
    }

    /// Remove a job from both the live registry and the store.
    pub async fn remove_job(&self, id: &str) -> CoreResult<()> {
        let removed = self.registry.write().await.remove(id);
        if removed.is_none() {
            return Err(CoreError::not_found(format!("no job with id {id}")));
        }
        self.schedules.lock().await.remove(id);
        self.next_fire.lock().await.remove(id);
        self.store.remove(id).await
    }

    pub async fn get_job(&self, id: &str) -> Option<Job> {
        self.registry.read().await.get(id).cloned()
    }

    /// Snapshot of every job currently registered in memory.
    pub async fn list_jobs(&self) -> Vec<Job> {
        self.registry.read().await.values().cloned().collect()
    }

    async fn fire(&self, job: &Job) {
        debug!(job_id = %job.id, tool = job.tool.as_str(), "scheduler: firing job");
        if let Err(e) = self
            .pool
            .submit(Task {
                job: job.clone(),
                scheduled_at: Utc::now(),
            })
            .await
        {
            error!(job_id = %job.id, error = %e, "scheduler: failed to submit firing to worker pool");
        }
    }

    async fn run_recurring_tick(&self, now: DateTime<Utc>) {
        let due_ids: Vec<String> = {
            let schedules = self.schedules.lock().await;
            let mut next_fire = self.next_fire.lock().await;
            let registry = self.registry.read().await;
            due_recurring(&registry, &schedules, &mut next_fire, now)
        };

        for id in due_ids {
            let job_opt = self.registry.read().await.get(&id).cloned();
            let Some(job) = job_opt else { continue };
            self.fire(&job).await;

            let mut registry = self.registry.write().await;
            if let Some(entry) = registry.get_mut(&id) {
                entry.run_count += 1;
            }
        }
    }

    async fn run_oneshot_sweep(&self, now: DateTime<Utc>) {
        let due_ids: Vec<String> = {
            let registry = self.registry.read().await;
            let jobs: Vec<Job> = registry.values().cloned().collect();
            check_oneshots(&jobs, now)
        };

        for id in due_ids {
            let job = {
                let registry = self.registry.read().await;
                registry.get(&id).cloned()
            };
            let Some(mut job) = job else { continue };

            self.fire(&job).await;
            job.executed = true;
            job.executed_at = Some(now);
            job.run_count += 1;

            if let Err(e) = self.store.upsert_job(job.clone()).await {
                error!(job_id = %id, error = %e, "scheduler: failed to persist one-shot execution");
            }
            self.registry.write().await.insert(id, job);
        }
    }

    /// Force an out-of-band one-shot sweep at `now`, without waiting for
    /// the 60-second tick. Exposed so integration tests (and ops tooling)
    /// can drive the sweep deterministically instead of sleeping past a
    /// real tick boundary.
    pub async fn force_oneshot_sweep(&self, now: DateTime<Utc>) {
        self.run_oneshot_sweep(now).await;
    }

    /// Force an out-of-band cleanup sweep, without waiting for the
    /// 24-hour tick.
    pub async fn force_cleanup_sweep(&self) {
        self.run_cleanup_sweep().await;
    }

    async fn run_cleanup_sweep(&self) {
        match self.store.remove_executed_oneshots().await {
            Ok(removed) if removed > 0 => {
                let mut registry = self.registry.write().await;
                registry.retain(|_, j| !(j.kind == JobKind::OneShot && j.executed));
                info!(removed, "scheduler: cleanup sweep purged executed one-shots");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "scheduler: cleanup sweep failed"),
        }
    }
}

/// Pure, clock-injectable: which one-shot jobs in `jobs` are due to
/// fire at `now`. Exposed standalone so tests don't need a running
/// Scheduler or real wall-clock time to exercise the one-shot sweep.
pub fn check_oneshots(jobs: &[Job], now: DateTime<Utc>) -> Vec<String> {
    jobs.iter()
        .filter(|j| {
            j.kind == JobKind::OneShot
                && !j.executed
                && j.execute_at.map(|t| t <= now).unwrap_or(false)
        })
        .map(|j| j.id.clone())
        .collect()
}

/// Which recurring jobs are due at `now`, advancing each due job's
/// entry in `next_fire` to its following fire time.
fn due_recurring(
    registry: &HashMap<String, Job>,
    schedules: &HashMap<String, Schedule>,
    next_fire: &mut HashMap<String, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut due = Vec::new();
    for (id, schedule) in schedules.iter() {
        if !registry.contains_key(id) {
            continue;
        }
        let entry = next_fire
            .entry(id.clone())
            .or_insert_with(|| calendar::next_after(schedule, now).unwrap_or(now));

        if *entry <= now {
            due.push(id.clone());
            *entry = calendar::next_after(schedule, now).unwrap_or(now + chrono::Duration::seconds(1));
        }
    }
    due
}

async fn recurring_loop(scheduler: Arc<Scheduler>, cancel: CancellationToken) {
    let mut tick = interval(RECURRING_TICK);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                scheduler.run_recurring_tick(Utc::now()).await;
            }
        }
    }
}

async fn oneshot_sweep_loop(scheduler: Arc<Scheduler>, cancel: CancellationToken) {
    let mut tick = interval(ONESHOT_SWEEP_TICK);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                scheduler.run_oneshot_sweep(Utc::now()).await;
            }
        }
    }
}

async fn cleanup_sweep_loop(scheduler: Arc<Scheduler>, cancel: CancellationToken) {
    let mut tick = interval(CLEANUP_SWEEP_TICK);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                scheduler.run_cleanup_sweep().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{PayloadMap, ToolKind};
    use std::collections::HashMap as StdHashMap;

    fn oneshot(id: &str, execute_at: DateTime<Utc>, executed: bool) -> Job {
        Job {
            id: id.to_string(),
            kind: JobKind::OneShot,
            schedule: String::new(),
            execute_at: Some(execute_at),
            user_id: "u".into(),
            tool: ToolKind::None,
            payload: PayloadMap::new(),
            session_id: String::new(),
            metadata: StdHashMap::new(),
            executed,
            executed_at: None,
            created_at: Utc::now(),
            run_count: 0,
        }
    }

    #[test]
    fn check_oneshots_finds_only_unexecuted_past_due() {
        let now = Utc::now();
        let jobs = vec![
            oneshot("due", now - chrono::Duration::seconds(5), false),
            oneshot("future", now + chrono::Duration::seconds(5), false),
            oneshot("already-ran", now - chrono::Duration::seconds(5), true),
        ];
        let due = check_oneshots(&jobs, now);
        assert_eq!(due, vec!["due".to_string()]);
    }

    #[test]
    fn due_recurring_fires_once_per_slot_and_advances() {
        let schedule = calendar::parse("* * * * * *").unwrap();
        let mut schedules = StdHashMap::new();
        schedules.insert("r1".to_string(), schedule);

        let mut registry = StdHashMap::new();
        let mut job = oneshot("r1", Utc::now(), false);
        job.kind = JobKind::Recurring;
        job.schedule = "* * * * * *".into();
        registry.insert("r1".to_string(), job);

        let mut next_fire = StdHashMap::new();
        let now = Utc::now();

        let due_first = due_recurring(&registry, &schedules, &mut next_fire, now);
        assert_eq!(due_first, vec!["r1".to_string()]);

        // Immediately re-checking at the same instant must not re-fire:
        // next_fire has already advanced past `now`.
        let due_again = due_recurring(&registry, &schedules, &mut next_fire, now);
        assert!(due_again.is_empty());
    }

    #[tokio::test]
    async fn add_job_replaces_same_id() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("jobs.jsonl"));
        let bus = Arc::new(crate::bus::MessageBus::new());
        bus.start().await.unwrap();
        let pool = Arc::new(WorkerPool::new(Default::default(), bus));
        pool.start().await.unwrap();

        let scheduler = Arc::new(Scheduler::new(store, pool.clone()));
        scheduler.start().await.unwrap();

        let mut job = oneshot("x", Utc::now() + chrono::Duration::hours(1), false);
        job.kind = JobKind::Recurring;
        job.schedule = "0 0 * * * *".into();
        job.execute_at = None;
        scheduler.add_job(job.clone()).await.unwrap();

        job.schedule = "0 30 * * * *".into();
        scheduler.add_job(job.clone()).await.unwrap();

        let stored = scheduler.store().load().await.unwrap();
        assert_eq!(stored.len(), 1, "replace must not duplicate the id");
        assert_eq!(stored[0].schedule, "0 30 * * * *");

        scheduler.stop().await.unwrap();
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn past_due_oneshot_fires_immediately_on_add() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("jobs.jsonl"));
        let bus = Arc::new(crate::bus::MessageBus::new());
        bus.start().await.unwrap();
        let mut outbound = bus.subscribe_outbound().await;
        let pool = Arc::new(WorkerPool::new(Default::default(), bus));
        pool.start().await.unwrap();

        let scheduler = Arc::new(Scheduler::new(store, pool.clone()));
        scheduler.start().await.unwrap();

        let mut job = oneshot("past", Utc::now() - chrono::Duration::seconds(5), false);
        job.tool = ToolKind::SendMessage;
        job.session_id = "telegram:7".into();
        job.payload.insert("message", serde_json::json!("go"));
        scheduler.add_job(job).await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .expect("should fire immediately")
            .expect("channel open");
        assert_eq!(msg.content, "go");

        let stored = scheduler.store().load().await.unwrap();
        assert!(stored[0].executed, "past-due one-shot must be marked executed");

        scheduler.stop().await.unwrap();
        pool.stop().await.unwrap();
    }
}
