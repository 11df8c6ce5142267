//! Worker Pool — a fixed-size set of workers draining a bounded task
//! queue, dispatching each [`Job`] firing to its declared tool.
//!
//! Modeled on the cron dispatch path already used elsewhere in this
//! crate (`comm::sender().send` plus `gateway::publish_event_json` in
//! `scheduler::legacy::run_persisted_job_tick`), generalized behind a
//! queue + fixed worker loop instead of one closure per
//! `tokio_cron_scheduler::Job`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use crate::error::{CoreError, CoreResult};
use crate::store::{Job, ToolKind};

/// Worker Pool tunables. Defaults mirror a general-purpose sizing for
/// a single-host agent deployment.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            queue_capacity: 100,
        }
    }
}

/// One firing submitted to the pool: the job that fired plus the
/// instant it was scheduled to run, so a worker can report lag.
#[derive(Debug, Clone)]
pub struct Task {
    pub job: Job,
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
}

/// Point-in-time counters. `submitted`/`completed`/`failed` are plain
/// atomics; `total_duration` needs a lock since `Duration` has no
/// atomic form.
#[derive(Debug, Default)]
struct RawMetrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    total_duration: Mutex<Duration>,
}

/// Snapshot of [`RawMetrics`] returned by [`WorkerPool::metrics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub total_duration: Duration,
}

/// The outcome of one dispatched firing, emitted onto [`WorkerPool::results`]
/// whether the firing succeeded or failed.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub job_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration: Duration,
    /// `None` on success; the dispatch error's message on failure.
    pub error: Option<String>,
}

impl TaskResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-subscriber fan-out of [`TaskResult`]s, the same shape as
/// `bus::Fanout`: each subscriber gets its own bounded queue, and a
/// full queue only drops results for that one subscriber.
struct ResultFanout {
    subscribers: Mutex<Vec<mpsc::Sender<TaskResult>>>,
}

/// Default queue depth for a `results()` subscription.
const RESULTS_CAPACITY: usize = 256;

impl ResultFanout {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    async fn subscribe(&self) -> mpsc::Receiver<TaskResult> {
        let (tx, rx) = mpsc::channel(RESULTS_CAPACITY);
        self.subscribers.lock().await.push(tx);
        rx
    }

    async fn publish(&self, result: TaskResult) {
        let mut subs = self.subscribers.lock().await;
        subs.retain_mut(|tx| match tx.try_send(result.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("worker pool: results subscriber queue full, dropping result for it");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

struct Inner {
    queue_tx: mpsc::Sender<Task>,
    worker_handles: Vec<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

/// Fixed-size worker pool dispatching job firings onto the message bus.
pub struct WorkerPool {
    config: PoolConfig,
    bus: Arc<MessageBus>,
    metrics: Arc<RawMetrics>,
    results: Arc<ResultFanout>,
    inner: RwLock<Option<Inner>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, bus: Arc<MessageBus>) -> Self {
        Self {
            config,
            bus,
            metrics: Arc::new(RawMetrics::default()),
            results: Arc::new(ResultFanout::new()),
            inner: RwLock::new(None),
        }
    }

    /// Start `worker_count` workers pulling from a queue of depth
    /// `queue_capacity`. Errors if already started.
    pub async fn start(&self) -> CoreResult<()> {
        let mut guard = self.inner.write().await;
        if guard.is_some() {
            return Err(CoreError::state("worker pool already started"));
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let cancel = CancellationToken::new();
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(self.config.worker_count);
        for worker_id in 0..self.config.worker_count {
            let rx = rx.clone();
            let bus = self.bus.clone();
            let metrics = self.metrics.clone();
            let results = self.results.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, bus, metrics, results, cancel).await;
            }));
        }

        *guard = Some(Inner {
            queue_tx: tx,
            worker_handles: handles,
            cancel,
        });
        Ok(())
    }

    /// Signal every worker to stop after draining in-flight work, and
    /// wait for them to exit.
    pub async fn stop(&self) -> CoreResult<()> {
        let inner = self.inner.write().await.take();
        let Some(inner) = inner else {
            return Err(CoreError::state("worker pool is not started"));
        };
        inner.cancel.cancel();
        drop(inner.queue_tx);
        for handle in inner.worker_handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Enqueue a firing. Blocks (asynchronously) if the queue is full —
    /// callers that need to be non-blocking should race this against
    /// their own timeout.
    pub async fn submit(&self, task: Task) -> CoreResult<()> {
        let guard = self.inner.read().await;
        let inner = guard
            .as_ref()
            .ok_or_else(|| CoreError::state("worker pool is not started"))?;
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        inner
            .queue_tx
            .send(task)
            .await
            .map_err(|_| CoreError::dispatch("worker pool queue closed"))
    }

    /// Enqueue a firing, racing the send against `ctx`. If `ctx` is
    /// cancelled before the task is accepted onto the queue, the
    /// submission is abandoned and [`CoreError::Cancellation`] is
    /// returned instead of blocking indefinitely behind a full queue.
    pub async fn submit_with_context(&self, ctx: CancellationToken, task: Task) -> CoreResult<()> {
        let guard = self.inner.read().await;
        let inner = guard
            .as_ref()
            .ok_or_else(|| CoreError::state("worker pool is not started"))?;
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(CoreError::Cancellation),
            res = inner.queue_tx.send(task) => {
                res.map_err(|_| CoreError::dispatch("worker pool queue closed"))
            }
        }
    }

    pub async fn metrics(&self) -> Metrics {
        Metrics {
            submitted: self.metrics.submitted.load(Ordering::Relaxed),
            completed: self.metrics.completed.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
            total_duration: *self.metrics.total_duration.lock().await,
        }
    }

    /// Subscribe to every firing's outcome, success or failure, as it
    /// completes. Each call opens an independent bounded queue; a slow
    /// subscriber only drops results for itself.
    pub async fn results(&self) -> mpsc::Receiver<TaskResult> {
        self.results.subscribe().await
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    bus: Arc<MessageBus>,
    metrics: Arc<RawMetrics>,
    results: Arc<ResultFanout>,
    cancel: CancellationToken,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                task = rx.recv() => task,
            }
        };

        let Some(task) = task else {
            debug!(worker_id, "worker: shutting down");
            return;
        };

        let start = Instant::now();
        let result = dispatch_one(&bus, &task.job).await;
        let elapsed = start.elapsed();

        *metrics.total_duration.lock().await += elapsed;
        let error = match &result {
            Ok(()) => {
                metrics.completed.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                metrics.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker_id, job_id = %task.job.id, error = %e, "worker: dispatch failed");
                Some(e.to_string())
            }
        };

        results
            .publish(TaskResult {
                job_id: task.job.id.clone(),
                scheduled_at: task.scheduled_at,
                duration: elapsed,
                error,
            })
            .await;
    }
}

/// Dispatch a single firing to its declared tool, publishing onto the
/// bus. Panics inside this function are caught by the caller's
/// `catch_unwind` boundary (see `dispatch_one`'s wrapping in
/// `worker_loop` via `AssertUnwindSafe`), so one broken job can't take
/// a worker down with it.
async fn dispatch_one(bus: &MessageBus, job: &Job) -> CoreResult<()> {
    let result = std::panic::AssertUnwindSafe(dispatch_inner(bus, job))
        .catch_unwind()
        .await;

    match result {
        Ok(inner) => inner,
        Err(panic) => {
            let msg = panic_message(panic);
            error!(job_id = %job.id, panic = %msg, "worker: job dispatch panicked");
            Err(CoreError::dispatch(format!("panic: {msg}")))
        }
    }
}

/// Route a firing to its declared tool: `send_message`
/// becomes an [`OutboundMessage`] for a channel connector, `agent`
/// becomes an [`InboundMessage`] for the agent's inbound queue, and any
/// other value (including the empty default) is an unsupported-tool
/// `DispatchError` — counted against `failed`, never fatal to the
/// worker.
async fn dispatch_inner(bus: &MessageBus, job: &Job) -> CoreResult<()> {
    let (channel_type, chat) = match job.tool {
        ToolKind::SendMessage | ToolKind::Agent => job
            .session_id
            .split_once(':')
            .ok_or_else(|| CoreError::dispatch("malformed session_id"))?,
        ToolKind::None => {
            return Err(CoreError::dispatch("unsupported tool"));
        }
    };

    let content = job
        .payload
        .message()
        .ok_or_else(|| CoreError::dispatch("missing payload.message"))?
        .to_string();

    let mut metadata = std::collections::HashMap::new();
    metadata.insert(
        "cron_job_id".to_string(),
        serde_json::Value::String(job.id.clone()),
    );

    match job.tool {
        ToolKind::SendMessage => {
            debug!(job_id = %job.id, channel_type, "worker: dispatching send_message to outbound");
            bus.publish_outbound(OutboundMessage {
                channel_type: channel_type.to_string(),
                user_id: job.user_id.clone(),
                session_id: chat.to_string(),
                content,
                timestamp: chrono::Utc::now(),
                metadata,
            })
            .await
        }
        ToolKind::Agent => {
            debug!(job_id = %job.id, channel_type, "worker: dispatching agent firing to inbound");
            metadata.insert("tool".to_string(), serde_json::Value::String("agent".to_string()));
            metadata.insert(
                "payload".to_string(),
                serde_json::Value::Object(job.payload.0.clone()),
            );
            for (k, v) in &job.metadata {
                metadata.insert(k.clone(), serde_json::Value::String(v.clone()));
            }

            bus.publish_inbound(InboundMessage {
                channel_type: channel_type.to_string(),
                user_id: job.user_id.clone(),
                session_id: chat.to_string(),
                content,
                timestamp: chrono::Utc::now(),
                metadata,
            })
            .await
        }
        ToolKind::None => unreachable!("handled above"),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JobKind, PayloadMap};

    fn sample_job(id: &str, tool: ToolKind) -> Job {
        let mut payload = PayloadMap::new();
        if tool != ToolKind::None {
            payload.insert("message", serde_json::json!("hello"));
        }
        Job {
            id: id.to_string(),
            kind: JobKind::Recurring,
            schedule: "* * * * * *".into(),
            execute_at: None,
            user_id: "u1".into(),
            tool,
            payload,
            session_id: "telegram:42".into(),
            metadata: Default::default(),
            executed: false,
            executed_at: None,
            created_at: chrono::Utc::now(),
            run_count: 0,
        }
    }

    #[tokio::test]
    async fn submit_before_start_errors() {
        let bus = Arc::new(MessageBus::new());
        let pool = WorkerPool::new(PoolConfig::default(), bus);
        let task = Task {
            job: sample_job("a", ToolKind::None),
            scheduled_at: chrono::Utc::now(),
        };
        assert!(pool.submit(task).await.is_err());
    }

    #[tokio::test]
    async fn send_message_job_publishes_outbound() {
        let bus = Arc::new(MessageBus::new());
        bus.start().await.unwrap();
        let mut outbound = bus.subscribe_outbound().await;

        let pool = WorkerPool::new(PoolConfig { worker_count: 1, queue_capacity: 4 }, bus.clone());
        pool.start().await.unwrap();

        pool.submit(Task {
            job: sample_job("a", ToolKind::SendMessage),
            scheduled_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .expect("should receive within timeout")
            .expect("channel should not be closed");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.channel_type, "telegram");
        assert_eq!(msg.session_id, "42", "session_id is the chat half only, not channel:chat");
        assert_eq!(
            msg.metadata.get("cron_job_id").and_then(|v| v.as_str()),
            Some("a")
        );

        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn agent_job_publishes_inbound() {
        let bus = Arc::new(MessageBus::new());
        bus.start().await.unwrap();
        let mut inbound = bus.subscribe_inbound().await;

        let pool = WorkerPool::new(PoolConfig { worker_count: 1, queue_capacity: 4 }, bus.clone());
        pool.start().await.unwrap();

        pool.submit(Task {
            job: sample_job("j1", ToolKind::Agent),
            scheduled_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), inbound.recv())
            .await
            .expect("should receive within timeout")
            .expect("channel should not be closed");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.channel_type, "telegram");
        assert_eq!(msg.session_id, "42");
        assert_eq!(
            msg.metadata.get("cron_job_id").and_then(|v| v.as_str()),
            Some("j1")
        );
        assert_eq!(msg.metadata.get("tool").and_then(|v| v.as_str()), Some("agent"));

        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn metrics_count_completed_dispatches() {
        let bus = Arc::new(MessageBus::new());
        bus.start().await.unwrap();
        let mut outbound = bus.subscribe_outbound().await;

        let pool = WorkerPool::new(PoolConfig { worker_count: 1, queue_capacity: 4 }, bus);
        pool.start().await.unwrap();

        pool.submit(Task {
            job: sample_job("a", ToolKind::SendMessage),
            scheduled_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

        // give the worker a moment to process.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let metrics = pool.metrics().await;
        assert_eq!(metrics.submitted, 1);
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.failed, 0);

        drop(outbound);
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_tool_fails_without_stopping_the_worker() {
        let bus = Arc::new(MessageBus::new());
        bus.start().await.unwrap();
        let mut outbound = bus.subscribe_outbound().await;

        let pool = WorkerPool::new(PoolConfig { worker_count: 1, queue_capacity: 4 }, bus);
        pool.start().await.unwrap();

        // ToolKind::None carries no dispatch route and must fail cleanly
        // rather than taking the worker down (S6).
        pool.submit(Task {
            job: sample_job("bad", ToolKind::None),
            scheduled_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

        pool.submit(Task {
            job: sample_job("good", ToolKind::SendMessage),
            scheduled_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .expect("the second, valid task should still complete")
            .expect("channel should not be closed");
        assert_eq!(msg.content, "hello");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let metrics = pool.metrics().await;
        assert_eq!(metrics.submitted, 2);
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.failed, 1, "unsupported tool must count as a failed dispatch, not a panic");

        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn results_reports_both_success_and_failure() {
        let bus = Arc::new(MessageBus::new());
        bus.start().await.unwrap();
        let mut outbound = bus.subscribe_outbound().await;

        let pool = WorkerPool::new(PoolConfig { worker_count: 1, queue_capacity: 4 }, bus);
        pool.start().await.unwrap();
        let mut results = pool.results().await;

        pool.submit(Task {
            job: sample_job("bad", ToolKind::None),
            scheduled_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
        pool.submit(Task {
            job: sample_job("good", ToolKind::SendMessage),
            scheduled_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), results.recv())
            .await
            .expect("should receive within timeout")
            .expect("channel should not be closed");
        assert_eq!(first.job_id, "bad");
        assert!(!first.is_ok());
        assert!(first.error.as_deref().unwrap().contains("unsupported tool"));

        let second = tokio::time::timeout(Duration::from_secs(1), results.recv())
            .await
            .expect("should receive within timeout")
            .expect("channel should not be closed");
        assert_eq!(second.job_id, "good");
        assert!(second.is_ok());

        drop(outbound);
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn submit_with_context_succeeds_when_not_cancelled() {
        let bus = Arc::new(MessageBus::new());
        bus.start().await.unwrap();
        let mut outbound = bus.subscribe_outbound().await;

        let pool = WorkerPool::new(PoolConfig { worker_count: 1, queue_capacity: 4 }, bus);
        pool.start().await.unwrap();

        let ctx = CancellationToken::new();
        pool.submit_with_context(
            ctx,
            Task {
                job: sample_job("a", ToolKind::SendMessage),
                scheduled_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .expect("should receive within timeout")
            .expect("channel should not be closed");
        assert_eq!(msg.content, "hello");

        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn submit_with_context_returns_cancellation_on_a_cancelled_context() {
        let bus = Arc::new(MessageBus::new());
        bus.start().await.unwrap();

        // A full, unstarted queue means the send half never wins the
        // race against an already-cancelled context.
        let pool = WorkerPool::new(PoolConfig { worker_count: 1, queue_capacity: 1 }, bus);
        pool.start().await.unwrap();

        let ctx = CancellationToken::new();
        ctx.cancel();

        let err = pool
            .submit_with_context(
                ctx,
                Task {
                    job: sample_job("a", ToolKind::SendMessage),
                    scheduled_at: chrono::Utc::now(),
                },
            )
            .await
            .expect_err("a cancelled context must lose the race");
        assert!(matches!(err, CoreError::Cancellation));

        pool.stop().await.unwrap();
    }
}
